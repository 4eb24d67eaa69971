//! Orchestrator configuration
//!
//! Loaded from a YAML file and selected by the binary at startup:
//!
//! ```yaml
//! backend: kubernetes
//! kubernetes:
//!   kubeconfig: k8sconfig.yaml
//!   namespace: gzctf
//!   publicHost: 203.0.113.10
//!   rollbackPartialCreate: false
//! registry:
//!   serverAddress: registry.example.com
//!   username: ctf
//!   password: secret
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::registry::RegistryCredentials;
use crate::{Error, DEFAULT_KUBECONFIG_PATH, DEFAULT_NAMESPACE};

/// Which container backend serves instances
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kubernetes cluster (Pod + NodePort Service)
    #[default]
    Kubernetes,
    /// Single Docker Engine host
    Docker,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "docker" => Ok(Self::Docker),
            _ => Err(Error::validation(format!(
                "invalid backend: {s}, expected one of: kubernetes, docker"
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// Kubernetes backend settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesSettings {
    /// Kubeconfig used to reach the control plane; must exist
    pub kubeconfig: PathBuf,
    /// Namespace holding all instances
    pub namespace: String,
    /// Address advertised to players; defaults to the API server host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
    /// Delete the Pod again when its Service cannot be created
    ///
    /// Off by default: a failed endpoint leaves the workload behind for a
    /// later destroy sweep.
    pub rollback_partial_create: bool,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            kubeconfig: PathBuf::from(DEFAULT_KUBECONFIG_PATH),
            namespace: DEFAULT_NAMESPACE.to_string(),
            public_host: None,
            rollback_partial_create: false,
        }
    }
}

/// Docker backend settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerSettings {
    /// Engine endpoint (`unix:///var/run/docker.sock`, `tcp://host:2375`);
    /// local defaults when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Address advertised to players; defaults to `127.0.0.1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
    /// Network to attach instances to; engine default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// Top-level orchestrator configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// Kubernetes backend settings
    pub kubernetes: KubernetesSettings,
    /// Docker backend settings
    pub docker: DockerSettings,
    /// Private registry login, if images need one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryCredentials>,
}

impl OrchestratorConfig {
    /// Parse a configuration document
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid orchestrator config: {}", e)))
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_for_path(path, format!("failed to read config: {}", e))
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            Error::Configuration { message, .. } => Error::configuration_for_path(path, message),
            other => other,
        })
    }

    /// Registry credentials, only when all three parts are set
    pub fn registry_credentials(&self) -> Option<&RegistryCredentials> {
        self.registry.as_ref().filter(|r| r.is_complete())
    }
}
