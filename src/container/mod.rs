//! Domain types for challenge instances
//!
//! - [`ContainerConfig`] - what the caller asks for
//! - [`ContainerRecord`] - what the caller gets back and keeps
//! - [`ContainerInfo`] / [`NodeInfo`] - read-only diagnostic projections

mod config;
mod info;
mod record;

pub use config::ContainerConfig;
pub use info::{render_host_report, ContainerInfo, NodeInfo};
pub use record::{ContainerRecord, ContainerStatus};
