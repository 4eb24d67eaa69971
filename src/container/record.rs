//! The instance record handed back to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an instance as seen by callers
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum ContainerStatus {
    /// Submitted but not (yet) running
    #[default]
    Pending,
    /// Running, or ran to completion
    Running,
    /// Torn down or no longer present; terminal
    Destroyed,
}

impl ContainerStatus {
    /// Returns true once the instance can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// A provisioned challenge instance
///
/// Created only by a successful `create_container`. Afterwards it is owned by
/// the caller, who must serialize `query_container` and `destroy_container`
/// calls per `container_id`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Generated resource name; stable for the life of the instance
    pub container_id: String,
    /// Image the instance was created from
    pub image: String,
    /// Port inside the container
    pub port: u16,
    /// Publicly reachable address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Publicly reachable port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    /// Address inside the cluster or engine network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_ip: Option<String>,
    /// Last observed status
    pub status: ContainerStatus,
    /// Whether traffic is relayed (NodePort) rather than routed directly
    pub is_proxy: bool,
    /// When creation completed
    pub started_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Create a pending record for a freshly submitted instance
    pub fn new(container_id: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            container_id: container_id.into(),
            image: image.into(),
            port,
            public_ip: None,
            public_port: None,
            internal_ip: None,
            status: ContainerStatus::Pending,
            is_proxy: false,
            started_at: Utc::now(),
        }
    }

    /// Rehydrate a record from nothing but a stored instance name
    ///
    /// Enough for `query_container` and `destroy_container`, which only
    /// address the backend by `container_id`.
    pub fn from_id(container_id: impl Into<String>) -> Self {
        Self::new(container_id, String::new(), 0)
    }

    /// Public `host:port` endpoint, once both halves are known
    pub fn public_endpoint(&self) -> Option<String> {
        match (&self.public_ip, self.public_port) {
            (Some(ip), Some(port)) => Some(format!("{}:{}", ip, port)),
            _ => None,
        }
    }

    /// Returns true once the record is terminal
    pub fn is_destroyed(&self) -> bool {
        self.status.is_terminal()
    }
}
