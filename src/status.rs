//! Mapping of backend-native lifecycle values onto [`ContainerStatus`]

use crate::ContainerStatus;

/// Pod phases that count as a live (or completed) instance
const RUNNING_PHASES: &[&str] = &["Running", "Succeeded"];

/// Map a Pod phase to a [`ContainerStatus`]
///
/// Total: `Running` and `Succeeded` map to [`ContainerStatus::Running`];
/// anything else, including an absent or unknown phase, is
/// [`ContainerStatus::Pending`]. Absence of the Pod itself is handled by the
/// caller and maps to [`ContainerStatus::Destroyed`].
pub fn status_from_phase(phase: Option<&str>) -> ContainerStatus {
    match phase {
        Some(p) if RUNNING_PHASES.contains(&p) => ContainerStatus::Running,
        _ => ContainerStatus::Pending,
    }
}

/// Map a Docker container state to a [`ContainerStatus`]
///
/// Only `running` counts; a created, restarting or exited container is still
/// reported as pending until it is removed.
pub fn status_from_docker_state(running: Option<bool>) -> ContainerStatus {
    if running.unwrap_or(false) {
        ContainerStatus::Running
    } else {
        ContainerStatus::Pending
    }
}
