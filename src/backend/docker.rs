//! Docker backend
//!
//! Each instance is one container on a single Docker Engine host, with the
//! challenge port published on a host port chosen by the engine. Players
//! connect to `public_host:host_port` directly, so records from this backend
//! are never proxied.
//!
//! Engine access goes through [`EngineApi`] so the lifecycle logic can be
//! exercised against a mock; production uses [`EngineClient`] over
//! [`bollard::Docker`].

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, HostConfig, PortBinding, SystemInfo,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::{cancellable, ContainerBackend};
use crate::config::{BackendKind, DockerSettings};
use crate::container::render_host_report;
use crate::identity::allocate_name;
use crate::registry::RegistryCredentials;
use crate::status::status_from_docker_state;
use crate::workload::instance_labels;
use crate::{
    ContainerConfig, ContainerInfo, ContainerRecord, ContainerStatus, Error, NodeInfo, Result,
    FLAG_ENV_KEY, LABEL_RESOURCE_ID,
};

/// Engine request timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Host advertised when none is configured
const DEFAULT_PUBLIC_HOST: &str = "127.0.0.1";

/// Registry implied by image references without a host part
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Title of the host report
const HOST_REPORT_TITLE: &str = "Docker Host";

/// Trait abstracting the Docker Engine calls the backend makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Pull an image, authenticating only when credentials are given
    async fn pull_image(&self, image: &str, credentials: Option<DockerCredentials>) -> Result<()>;

    /// Create a named container, returning engine warnings
    async fn create_container(&self, name: &str, spec: Config<String>) -> Result<Vec<String>>;

    /// Start a created container
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Inspect a container
    async fn inspect_container(&self, name: &str) -> Result<ContainerInspectResponse>;

    /// Force-remove a container, running or not
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// List all containers carrying `label`
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>>;

    /// Engine system information
    async fn info(&self) -> Result<SystemInfo>;
}

/// Real engine client
pub struct EngineClient {
    docker: Docker,
}

impl EngineClient {
    /// Wrap a connected [`Docker`] handle
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn pull_image(&self, image: &str, credentials: Option<DockerCredentials>) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, credentials)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: Config<String>) -> Result<Vec<String>> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), spec).await?;
        Ok(created.warnings)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInspectResponse> {
        Ok(self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?)
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![label.to_string()])]),
            ..Default::default()
        };
        Ok(self.docker.list_containers(Some(options)).await?)
    }

    async fn info(&self) -> Result<SystemInfo> {
        Ok(self.docker.info().await?)
    }
}

/// Backend provisioning instances as plain containers on one engine
pub struct DockerBackend<E: EngineApi = EngineClient> {
    engine: E,
    public_host: String,
    network: Option<String>,
    credentials: Option<RegistryCredentials>,
}

impl DockerBackend<EngineClient> {
    /// Connect to the engine named in `settings`
    ///
    /// No request is made here; an unreachable engine surfaces on the first
    /// operation.
    pub fn connect(
        settings: &DockerSettings,
        credentials: Option<RegistryCredentials>,
    ) -> Result<Self> {
        let docker = match settings.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(endpoint) if endpoint.starts_with("unix://") => {
                Docker::connect_with_unix(endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(endpoint) => {
                Docker::connect_with_http(endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| Error::configuration(format!("failed to connect docker engine: {}", e)))?;

        let backend = Self::with_engine(EngineClient::new(docker), settings, credentials);
        info!(
            endpoint = settings.endpoint.as_deref().unwrap_or("local"),
            public_host = %backend.public_host,
            "docker backend started"
        );
        Ok(backend)
    }
}

impl<E: EngineApi> DockerBackend<E> {
    /// Build a backend over an existing [`EngineApi`]
    pub fn with_engine(
        engine: E,
        settings: &DockerSettings,
        credentials: Option<RegistryCredentials>,
    ) -> Self {
        Self {
            engine,
            public_host: settings
                .public_host
                .clone()
                .unwrap_or_else(|| DEFAULT_PUBLIC_HOST.to_string()),
            network: settings.network.clone(),
            credentials: credentials.filter(RegistryCredentials::is_complete),
        }
    }

    /// Registry login to present when pulling `image`
    ///
    /// Only the registry the credentials belong to ever sees them.
    pub fn credentials_for(&self, image: &str) -> Option<DockerCredentials> {
        let credentials = self.credentials.as_ref()?;
        if normalize_registry(&credentials.server_address) != image_registry(image) {
            return None;
        }
        Some(DockerCredentials {
            username: Some(credentials.username.clone()),
            password: Some(credentials.password.clone()),
            serveraddress: Some(credentials.server_address.clone()),
            ..Default::default()
        })
    }

    /// Best-effort removal of a container that never became an instance
    async fn discard(&self, name: &str) {
        match self.engine.remove_container(name).await {
            Ok(()) => debug!(name = %name, "discarded unstarted container"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(name = %name, error = %e, "failed to discard unstarted container"),
        }
    }
}

/// Registry host of an image reference
///
/// The first path segment is a host only if it looks like one (contains
/// `.` or `:`, or is `localhost`); otherwise the image lives on Docker Hub.
pub fn image_registry(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            normalize_registry(first)
        }
        _ => DEFAULT_REGISTRY.to_string(),
    }
}

/// Canonical form of a registry address for comparison
fn normalize_registry(address: &str) -> String {
    let address = address.trim();
    let address = address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address);
    let host = address.split('/').next().unwrap_or(address).to_ascii_lowercase();
    match host.as_str() {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DEFAULT_REGISTRY.to_string()
        }
        _ => host,
    }
}

/// Port key used by the engine for a TCP port
fn port_key(port: u16) -> String {
    format!("{}/tcp", port)
}

/// Container create body for one instance
///
/// The challenge port is published with an empty host port so the engine
/// assigns a free one.
pub fn container_spec(
    name: &str,
    config: &ContainerConfig,
    network: Option<&str>,
) -> Config<String> {
    let key = port_key(config.exposed_port);
    let env = config
        .flag
        .as_ref()
        .map(|flag| vec![format!("{}={}", FLAG_ENV_KEY, flag)]);

    Config {
        image: Some(config.image.clone()),
        env,
        labels: Some(
            instance_labels(name, &config.team_info)
                .into_iter()
                .collect(),
        ),
        exposed_ports: Some(HashMap::from([(key.clone(), HashMap::new())])),
        host_config: Some(HostConfig {
            port_bindings: Some(HashMap::from([(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: None,
                }]),
            )])),
            memory: Some(i64::from(config.memory_limit_mib) * 1024 * 1024),
            nano_cpus: Some(i64::from(config.cpu_count) * 1_000_000_000),
            network_mode: network.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host port the engine bound to `exposed_port`
pub fn published_port(inspect: &ContainerInspectResponse, exposed_port: u16) -> Option<u16> {
    inspect
        .network_settings
        .as_ref()?
        .ports
        .as_ref()?
        .get(&port_key(exposed_port))?
        .as_ref()?
        .iter()
        .filter_map(|b| b.host_port.as_deref())
        .find_map(|p| p.parse().ok())
}

/// Address of the container on its network, if it has one
pub fn internal_address(inspect: &ContainerInspectResponse) -> Option<String> {
    let settings = inspect.network_settings.as_ref()?;
    settings
        .ip_address
        .clone()
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            settings
                .networks
                .as_ref()?
                .values()
                .filter_map(|n| n.ip_address.clone())
                .find(|ip| !ip.is_empty())
        })
}

/// Project a container summary onto the diagnostic summary
pub fn container_info(summary: &ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    ContainerInfo {
        id: summary.id.clone().unwrap_or_default(),
        name,
        image: summary.image.clone().unwrap_or_default(),
        state: summary
            .status
            .clone()
            .or_else(|| summary.state.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
    }
}

/// Project the engine's system info onto a host report entry
pub fn host_node_info(info: &SystemInfo, public_host: &str) -> NodeInfo {
    let mut capacity = std::collections::BTreeMap::new();
    if let Some(ncpu) = info.ncpu {
        capacity.insert("cpu".to_string(), ncpu.to_string());
    }
    if let Some(mem) = info.mem_total {
        capacity.insert("memory".to_string(), format!("{}Mi", mem / (1024 * 1024)));
    }
    if let Some(running) = info.containers_running {
        capacity.insert("containers".to_string(), running.to_string());
    }

    let mut conditions = Vec::new();
    if let Some(version) = &info.server_version {
        conditions.push(("ServerVersion".to_string(), version.clone()));
    }
    if let Some(os) = &info.operating_system {
        conditions.push(("OperatingSystem".to_string(), os.clone()));
    }

    NodeInfo {
        name: info.name.clone().unwrap_or_else(|| "docker".to_string()),
        capacity,
        conditions,
        addresses: vec![(public_host.to_string(), "PublicHost".to_string())],
    }
}

#[async_trait]
impl<E: EngineApi + 'static> ContainerBackend for DockerBackend<E> {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    #[instrument(skip_all, fields(image = %config.image, team = %config.team_info))]
    async fn create_container(
        &self,
        config: &ContainerConfig,
        cancel: &CancellationToken,
    ) -> Result<ContainerRecord> {
        config.validate()?;

        let name = allocate_name(&config.image);

        debug!(name = %name, "pulling instance image");
        let pulled = cancellable(
            cancel,
            "create_container",
            self.engine
                .pull_image(&config.image, self.credentials_for(&config.image)),
        )
        .await;
        if let Err(e) = pulled {
            if e.is_cancelled() {
                return Err(e);
            }
            error!(name = %name, kind = "Image", error = %e, "instance creation failed");
            return Err(Error::provision_from(&name, "Image", e));
        }

        let spec = container_spec(&name, config, self.network.as_deref());
        let warnings = match cancellable(
            cancel,
            "create_container",
            self.engine.create_container(&name, spec),
        )
        .await
        {
            Ok(warnings) => warnings,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(name = %name, kind = "Container", error = %e, "instance creation failed");
                return Err(Error::provision_from(&name, "Container", e));
            }
        };
        for warning in &warnings {
            warn!(name = %name, warning = %warning, "engine warning on create");
        }

        let started = cancellable(cancel, "create_container", async {
            self.engine.start_container(&name).await?;
            self.engine.inspect_container(&name).await
        })
        .await;
        let inspect = match started {
            Ok(inspect) => inspect,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(name = %name, kind = "Container", error = %e, "instance failed to start");
                self.discard(&name).await;
                return Err(Error::provision_from(&name, "Container", e));
            }
        };

        let Some(public_port) = published_port(&inspect, config.exposed_port) else {
            error!(name = %name, "engine published no host port");
            self.discard(&name).await;
            return Err(Error::provision(
                &name,
                "Container",
                "engine published no host port",
            ));
        };

        let mut record = ContainerRecord::new(&name, &config.image, config.exposed_port);
        record.public_ip = Some(self.public_host.clone());
        record.public_port = Some(public_port);
        record.internal_ip = internal_address(&inspect);
        record.status = status_from_docker_state(inspect.state.as_ref().and_then(|s| s.running));
        record.is_proxy = false;
        record.started_at = Utc::now();

        info!(
            name = %name,
            endpoint = %format!("{}:{}", self.public_host, public_port),
            "instance created"
        );
        Ok(record)
    }

    #[instrument(skip_all, fields(name = %record.container_id))]
    async fn destroy_container(
        &self,
        record: &mut ContainerRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let removed = cancellable(
            cancel,
            "destroy_container",
            self.engine.remove_container(&record.container_id),
        )
        .await;

        match removed {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(name = %record.container_id, "instance container already gone");
            }
            Err(e) => {
                if !e.is_cancelled() {
                    error!(name = %record.container_id, error = %e, "failed to remove instance container");
                }
                return Err(e);
            }
        }

        record.status = ContainerStatus::Destroyed;
        info!(name = %record.container_id, "instance destroyed");
        Ok(())
    }

    #[instrument(skip_all, fields(name = %record.container_id))]
    async fn query_container(
        &self,
        record: &mut ContainerRecord,
        cancel: &CancellationToken,
    ) -> Result<ContainerStatus> {
        if record.is_destroyed() {
            return Ok(ContainerStatus::Destroyed);
        }

        let inspected = cancellable(
            cancel,
            "query_container",
            self.engine.inspect_container(&record.container_id),
        )
        .await;

        match inspected {
            Ok(inspect) => {
                record.status =
                    status_from_docker_state(inspect.state.as_ref().and_then(|s| s.running));
                record.internal_ip = internal_address(&inspect);
                debug!(name = %record.container_id, status = %record.status, "instance status refreshed");
            }
            Err(e) if e.is_not_found() => {
                debug!(name = %record.container_id, "instance container no longer exists");
                record.status = ContainerStatus::Destroyed;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(name = %record.container_id, error = %e, "failed to query instance");
                }
                return Err(e);
            }
        }

        Ok(record.status)
    }

    async fn get_containers(&self, cancel: &CancellationToken) -> Result<Vec<ContainerInfo>> {
        let summaries = cancellable(
            cancel,
            "get_containers",
            self.engine.list_containers(LABEL_RESOURCE_ID),
        )
        .await?;
        Ok(summaries.iter().map(container_info).collect())
    }

    async fn get_host_info(&self, cancel: &CancellationToken) -> Result<String> {
        let info = cancellable(cancel, "get_host_info", self.engine.info()).await?;
        Ok(render_host_report(
            HOST_REPORT_TITLE,
            &[host_node_info(&info, &self.public_host)],
        ))
    }
}
