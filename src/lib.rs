//! Challenge Orchestrator - ephemeral per-team challenge instances
//!
//! Provisions a short-lived, network-exposed instance of a challenge image for
//! a single team, tracks its lifecycle, and tears it down again. The contest
//! web application calls into this crate through the [`ContainerBackend`]
//! trait and persists the returned [`ContainerRecord`]s itself.
//!
//! # Architecture
//!
//! An instance is a workload (Pod) plus an externally reachable endpoint
//! (NodePort Service). Creation submits the workload first and the endpoint
//! second; teardown deletes in reverse and treats "not found" as done.
//!
//! # Modules
//!
//! - [`backend`] - Backend trait plus Kubernetes and Docker implementations
//! - [`container`] - Domain types (config, record, projections)
//! - [`identity`] - Collision-resistant resource name allocation
//! - [`registry`] - Registry pull-secret derivation and provisioning
//! - [`workload`] - Pod and Service descriptors for an instance
//! - [`status`] - Backend phase to [`ContainerStatus`] mapping
//! - [`config`] - Orchestrator configuration file
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod identity;
pub mod registry;
pub mod status;
pub mod telemetry;
pub mod workload;

pub use backend::ContainerBackend;
pub use container::{ContainerConfig, ContainerInfo, ContainerRecord, ContainerStatus, NodeInfo};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default namespace holding challenge instances
pub const DEFAULT_NAMESPACE: &str = "gzctf";

/// Default kubeconfig path, mounted next to the web application
pub const DEFAULT_KUBECONFIG_PATH: &str = "k8sconfig.yaml";

/// Label carrying the instance resource name (also the Service selector)
pub const LABEL_RESOURCE_ID: &str = "ctf.gzti.me/ResourceId";

/// Label carrying the owning team
pub const LABEL_TEAM_INFO: &str = "ctf.gzti.me/TeamInfo";

/// Environment variable through which challenge images receive their flag
pub const FLAG_ENV_KEY: &str = "GZCTF_FLAG";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "challenge-orchestrator";
