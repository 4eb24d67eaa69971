//! Kubernetes backend
//!
//! Each instance is a Pod plus a NodePort Service in one managed namespace.
//! Creation submits the Pod, then the Service; the node port assigned to the
//! Service and the API server's host form the public endpoint.
//!
//! All API access goes through [`ClusterApi`] so the lifecycle logic can be
//! exercised against a mock in tests while production uses
//! [`KubeClusterApi`] over a single shared [`kube::Client`].

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::{cancellable, ContainerBackend};
use crate::config::{BackendKind, KubernetesSettings};
use crate::container::render_host_report;
use crate::identity::allocate_name;
use crate::registry::{ensure_pull_secret, RegistryCredentials};
use crate::status::status_from_phase;
use crate::workload::{assigned_node_port, build_instance, InstanceResources};
use crate::{
    ContainerConfig, ContainerInfo, ContainerRecord, ContainerStatus, Error, NodeInfo, Result,
    FIELD_MANAGER,
};

/// Title of the host report
const HOST_REPORT_TITLE: &str = "K8s Nodes";

/// Trait abstracting the Kubernetes calls the backend makes
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the namespace if it does not exist yet
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Create a Secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Create a Pod, returning the stored object
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Create a Service, returning the stored object (with node ports assigned)
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    /// Read a Pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Delete a Pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a Service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// List Pods in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// List cluster nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        // Server-side apply never fails on "already exists"
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
            .await?;
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), service).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Extract the host part of an API server URL
///
/// `https://10.0.0.1:6443` -> `10.0.0.1`, `https://[fd00::1]:6443/` -> `fd00::1`.
pub fn host_from_cluster_url(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit('@').next()?;
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next()?,
        None => authority.split(':').next()?,
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Backend provisioning instances as Pods + NodePort Services
pub struct KubernetesBackend<C: ClusterApi = KubeClusterApi> {
    api: C,
    namespace: String,
    public_host: String,
    pull_secret: Option<String>,
    rollback_partial_create: bool,
}

impl KubernetesBackend<KubeClusterApi> {
    /// Connect using the kubeconfig named in `settings`
    ///
    /// A missing or unreadable kubeconfig is a fatal [`Error::Configuration`].
    /// The managed namespace and the registry pull secret are ensured before
    /// the backend is returned.
    pub async fn connect(
        settings: &KubernetesSettings,
        registry: Option<&RegistryCredentials>,
    ) -> Result<Self> {
        let path = settings.kubeconfig.as_path();
        if !path.exists() {
            error!(path = %path.display(), "kubeconfig not found, mount it next to the application");
            return Err(Error::configuration_for_path(
                path,
                "kubeconfig file does not exist",
            ));
        }

        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::configuration_for_path(path, format!("failed to read kubeconfig: {}", e))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::configuration_for_path(path, format!("failed to load kubeconfig: {}", e))
            })?;

        let cluster_url = config.cluster_url.to_string();
        let public_host = settings
            .public_host
            .clone()
            .or_else(|| host_from_cluster_url(&cluster_url))
            .ok_or_else(|| {
                Error::configuration_for_path(
                    path,
                    format!("cannot derive public host from {}", cluster_url),
                )
            })?;

        let client = Client::try_from(config).map_err(|e| {
            Error::configuration_for_path(path, format!("failed to create client: {}", e))
        })?;

        let backend =
            Self::with_api(KubeClusterApi::new(client), settings, public_host, registry).await?;
        info!(cluster = %cluster_url, namespace = %backend.namespace, "kubernetes backend started");
        Ok(backend)
    }
}

impl<C: ClusterApi> KubernetesBackend<C> {
    /// Build a backend over an existing [`ClusterApi`]
    pub async fn with_api(
        api: C,
        settings: &KubernetesSettings,
        public_host: impl Into<String>,
        registry: Option<&RegistryCredentials>,
    ) -> Result<Self> {
        api.ensure_namespace(&settings.namespace).await?;

        let pull_secret = match registry {
            Some(credentials) => ensure_pull_secret(&api, &settings.namespace, credentials).await?,
            None => None,
        };

        Ok(Self {
            api,
            namespace: settings.namespace.clone(),
            public_host: public_host.into(),
            pull_secret,
            rollback_partial_create: settings.rollback_partial_create,
        })
    }

    /// Namespace holding the instances
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Pull secret referenced by new Pods, if any
    pub fn pull_secret(&self) -> Option<&str> {
        self.pull_secret.as_deref()
    }

    /// Best-effort removal of what a failed creation left behind
    async fn rollback(&self, name: &str, service_created: bool) {
        if !self.rollback_partial_create {
            warn!(name = %name, "instance workload left behind, destroy it to reclaim");
            return;
        }

        if service_created {
            if let Err(e) = self.api.delete_service(&self.namespace, name).await {
                if !e.is_not_found() {
                    warn!(name = %name, error = %e, "rollback failed to delete service");
                }
            }
        }
        match self.api.delete_pod(&self.namespace, name).await {
            Ok(()) => info!(name = %name, "rolled back instance workload"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(name = %name, error = %e, "rollback failed to delete pod"),
        }
    }
}

/// Log a failed submission and wrap it as a provision error
fn provision_failure(name: &str, kind: &str, e: Error) -> Error {
    error!(
        name = %name,
        kind = %kind,
        status = ?e.status_code(),
        error = %e,
        "instance creation failed"
    );
    Error::provision_from(name, kind, e)
}

/// Treat a missing resource as already deleted
fn settle_delete(kind: &str, name: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            debug!(name = %name, kind = %kind, "deleted instance resource");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(name = %name, kind = %kind, "instance resource already gone");
            Ok(())
        }
        Err(e) => {
            if !e.is_cancelled() {
                error!(name = %name, kind = %kind, error = %e, "failed to delete instance resource");
            }
            Err(e)
        }
    }
}

/// Project a Pod onto the diagnostic summary
pub fn container_info(pod: &Pod) -> ContainerInfo {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let image = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    let state = pod
        .status
        .as_ref()
        .and_then(|s| s.message.clone().or_else(|| s.phase.clone()))
        .unwrap_or_else(|| "Unknown".to_string());

    ContainerInfo {
        id: name.clone(),
        name,
        image,
        state,
    }
}

/// Project a Node onto the host report entry
pub fn node_info(node: &Node) -> NodeInfo {
    let status = node.status.as_ref();
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        capacity: status
            .and_then(|s| s.capacity.as_ref())
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
            .unwrap_or_default(),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|c| {
                c.iter()
                    .map(|c| (c.type_.clone(), c.status.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        addresses: status
            .and_then(|s| s.addresses.as_ref())
            .map(|a| {
                a.iter()
                    .map(|a| (a.address.clone(), a.type_.clone()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[async_trait]
impl<C: ClusterApi + 'static> ContainerBackend for KubernetesBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    #[instrument(skip_all, fields(image = %config.image, team = %config.team_info))]
    async fn create_container(
        &self,
        config: &ContainerConfig,
        cancel: &CancellationToken,
    ) -> Result<ContainerRecord> {
        config.validate()?;

        let name = allocate_name(&config.image);
        let InstanceResources { pod, service } =
            build_instance(&name, &self.namespace, config, self.pull_secret.as_deref());

        debug!(name = %name, "submitting instance pod");
        if let Err(e) = cancellable(
            cancel,
            "create_container",
            self.api.create_pod(&self.namespace, &pod),
        )
        .await
        {
            if e.is_cancelled() {
                return Err(e);
            }
            return Err(provision_failure(&name, "Pod", e));
        }

        debug!(name = %name, "submitting instance service");
        let service = match cancellable(
            cancel,
            "create_container",
            self.api.create_service(&self.namespace, &service),
        )
        .await
        {
            Ok(service) => service,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                let err = provision_failure(&name, "Service", e);
                self.rollback(&name, false).await;
                return Err(err);
            }
        };

        let Some(public_port) = assigned_node_port(&service) else {
            error!(name = %name, "control plane assigned no node port");
            self.rollback(&name, true).await;
            return Err(Error::provision(
                &name,
                "Service",
                "control plane assigned no node port",
            ));
        };

        let mut record = ContainerRecord::new(&name, &config.image, config.exposed_port);
        record.public_ip = Some(self.public_host.clone());
        record.public_port = Some(public_port);
        record.is_proxy = true;
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
        let name = record.container_id.clone();

        // Endpoint first so no traffic reaches a terminating workload
        let deleted = cancellable(
            cancel,
            "destroy_container",
            self.api.delete_service(&self.namespace, &name),
        )
        .await;
        settle_delete("Service", &name, deleted)?;

        let deleted = cancellable(
            cancel,
            "destroy_container",
            self.api.delete_pod(&self.namespace, &name),
        )
        .await;
        settle_delete("Pod", &name, deleted)?;

        record.status = ContainerStatus::Destroyed;
        info!(name = %name, "instance destroyed");
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

        match cancellable(
            cancel,
            "query_container",
            self.api.get_pod(&self.namespace, &record.container_id),
        )
        .await
        {
            Ok(pod) => {
                let status = pod.status.as_ref();
                record.status = status_from_phase(status.and_then(|s| s.phase.as_deref()));
                record.internal_ip = status.and_then(|s| s.pod_ip.clone());
                debug!(name = %record.container_id, status = %record.status, "instance status refreshed");
            }
            Err(e) if e.is_not_found() => {
                debug!(name = %record.container_id, "instance pod no longer exists");
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
        let pods = cancellable(cancel, "get_containers", self.api.list_pods(&self.namespace))
            .await?;
        Ok(pods.iter().map(container_info).collect())
    }

    async fn get_host_info(&self, cancel: &CancellationToken) -> Result<String> {
        let nodes = cancellable(cancel, "get_host_info", self.api.list_nodes()).await?;
        let nodes: Vec<NodeInfo> = nodes.iter().map(node_info).collect();
        Ok(render_host_report(HOST_REPORT_TITLE, &nodes))
    }
}
