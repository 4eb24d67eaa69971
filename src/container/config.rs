//! Instance request supplied by the web application

use serde::{Deserialize, Serialize};

use crate::Error;

/// Logical description of one challenge instance
///
/// Immutable input to [`crate::ContainerBackend::create_container`]. Resource
/// limits are enforced by the backend, not by this crate.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Registry reference of the challenge image
    pub image: String,
    /// Port the challenge listens on inside the container
    pub exposed_port: u16,
    /// CPU limit in whole cores
    pub cpu_count: u32,
    /// Memory limit in MiB
    pub memory_limit_mib: u32,
    /// Per-instance flag, injected through [`crate::FLAG_ENV_KEY`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    /// Opaque team identifier attached as a label
    pub team_info: String,
}

impl ContainerConfig {
    /// Create a config with the default limits (1 CPU, 64 MiB) and no flag
    pub fn new(image: impl Into<String>, exposed_port: u16, team_info: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            exposed_port,
            cpu_count: 1,
            memory_limit_mib: 64,
            flag: None,
            team_info: team_info.into(),
        }
    }

    /// Set the flag injected into the instance
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    /// Set CPU and memory limits
    pub fn with_limits(mut self, cpu_count: u32, memory_limit_mib: u32) -> Self {
        self.cpu_count = cpu_count;
        self.memory_limit_mib = memory_limit_mib;
        self
    }

    /// Validate the request before anything is sent to a backend
    pub fn validate(&self) -> Result<(), Error> {
        if self.image.trim().is_empty() {
            return Err(Error::validation_for_field("image", "image must not be empty"));
        }
        if self.exposed_port == 0 {
            return Err(Error::validation_for_field(
                "exposedPort",
                "exposed port must be in 1..=65535",
            ));
        }
        if self.cpu_count == 0 {
            return Err(Error::validation_for_field(
                "cpuCount",
                "cpu limit must be at least 1",
            ));
        }
        if self.memory_limit_mib == 0 {
            return Err(Error::validation_for_field(
                "memoryLimitMib",
                "memory limit must be at least 1 MiB",
            ));
        }
        Ok(())
    }
}
