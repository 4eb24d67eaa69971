//! Container backend abstraction
//!
//! Every backend implements [`ContainerBackend`], the contract the web
//! application consumes. Which implementation serves a process is decided
//! once at startup by [`connect`] from the [`OrchestratorConfig`].
//!
//! # Supported Backends
//!
//! - [`KubernetesBackend`] - Pod + NodePort Service per instance
//! - [`DockerBackend`] - one container with a published port per instance
//!
//! # Semantics shared by all backends
//!
//! - Every control-plane call is attempted once; retry policy belongs to the
//!   caller.
//! - Every operation takes a [`CancellationToken`]. A cancelled operation
//!   returns [`Error::Cancelled`] and leaves the caller's record untouched;
//!   resources already accepted by the control plane stay there.
//! - "Not found" during destroy or query means the instance is gone and
//!   yields [`ContainerStatus::Destroyed`].

pub mod docker;
pub mod kubernetes;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use docker::DockerBackend;
pub use kubernetes::KubernetesBackend;

use crate::config::{BackendKind, OrchestratorConfig};
use crate::{ContainerConfig, ContainerInfo, ContainerRecord, ContainerStatus, Error, Result};

/// Capability interface of a challenge-instance backend
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Provision a new instance
    ///
    /// Returns a record only when every resource of the instance was
    /// accepted; otherwise an error and no record.
    async fn create_container(
        &self,
        config: &ContainerConfig,
        cancel: &CancellationToken,
    ) -> Result<ContainerRecord>;

    /// Tear an instance down; safe to call repeatedly
    ///
    /// On success `record.status` is [`ContainerStatus::Destroyed`]. On
    /// failure the status is left unchanged so the caller can retry.
    async fn destroy_container(
        &self,
        record: &mut ContainerRecord,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Refresh status and internal address from the backend
    async fn query_container(
        &self,
        record: &mut ContainerRecord,
        cancel: &CancellationToken,
    ) -> Result<ContainerStatus>;

    /// List every instance the backend currently holds
    async fn get_containers(&self, cancel: &CancellationToken) -> Result<Vec<ContainerInfo>>;

    /// Human-readable capacity report of the backend hosts
    async fn get_host_info(&self, cancel: &CancellationToken) -> Result<String>;
}

/// Connect the backend selected by `config`
///
/// Fails with [`Error::Configuration`] when the backend's connection
/// settings are missing or unreadable.
pub async fn connect(config: &OrchestratorConfig) -> Result<Arc<dyn ContainerBackend>> {
    info!(backend = %config.backend, "connecting container backend");
    match config.backend {
        BackendKind::Kubernetes => {
            let backend =
                KubernetesBackend::connect(&config.kubernetes, config.registry_credentials())
                    .await?;
            Ok(Arc::new(backend))
        }
        BackendKind::Docker => {
            let backend =
                DockerBackend::connect(&config.docker, config.registry_credentials().cloned())?;
            Ok(Arc::new(backend))
        }
    }
}

/// Run `fut` unless `cancel` fires first
///
/// Cancellation wins ties so an already-cancelled token never starts a call.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        result = fut => result,
    }
}
