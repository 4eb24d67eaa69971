//! Error types for the challenge orchestrator
//!
//! Errors are structured with fields so that a failed provisioning attempt
//! can be correlated with the instance name and resource kind that failed.
//! "Not found" during teardown or status queries is not an error: backends
//! normalize it into [`crate::ContainerStatus::Destroyed`].

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for orchestrator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Docker Engine API error
    #[error("docker error: {source}")]
    Docker {
        /// The underlying bollard error
        #[from]
        source: bollard::errors::Error,
    },

    /// Missing or unreadable connection configuration (fatal at startup)
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's wrong
        message: String,
        /// Offending file, if the error concerns one
        path: Option<PathBuf>,
    },

    /// Invalid instance configuration supplied by the caller
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "exposed_port")
        field: Option<String>,
    },

    /// Instance creation failed; no record was produced
    #[error("provision error for {name} [{kind}]: {message}")]
    Provision {
        /// Generated instance name
        name: String,
        /// Resource kind being submitted (Pod, Service, Container, ...)
        kind: String,
        /// Status code reported by the control plane, if any
        status: Option<u16>,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// What was being serialized (if known)
        kind: Option<String>,
    },

    /// The caller cancelled the operation
    #[error("operation {operation} cancelled")]
    Cancelled {
        /// Name of the cancelled operation
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            path: None,
        }
    }

    /// Create a configuration error for a specific file
    pub fn configuration_for_path(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            path: Some(path.into()),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a provision error without a control-plane status code
    pub fn provision(
        name: impl Into<String>,
        kind: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provision {
            name: name.into(),
            kind: kind.into(),
            status: None,
            message: msg.into(),
        }
    }

    /// Wrap a failed control-plane submission into a provision error,
    /// keeping the status code when the control plane returned one
    pub fn provision_from(name: impl Into<String>, kind: impl Into<String>, source: Error) -> Self {
        Self::Provision {
            name: name.into(),
            kind: kind.into(),
            status: source.status_code(),
            message: source.to_string(),
        }
    }

    /// Create a serialization error with context on what was being encoded
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// HTTP-style status code reported by the control plane, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            Error::Docker {
                source: bollard::errors::Error::DockerResponseServerError { status_code, .. },
            } => Some(*status_code),
            Error::Provision { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the control plane reported the resource as missing
    ///
    /// 410 Gone is treated the same as 404: the resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self.status_code(), Some(404) | Some(410))
    }

    /// Whether the control plane reported the resource as already existing
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Whether this error came from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Check if a caller may reasonably retry the operation
    ///
    /// Nothing in this crate retries on its own; this only classifies.
    /// 4xx responses, validation and configuration problems need a fix first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Configuration { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
            Error::Kube { .. } | Error::Docker { .. } | Error::Provision { .. } => {
                !matches!(self.status_code(), Some(code) if (400..500).contains(&code))
            }
        }
    }

    /// Get the instance name if this error is associated with one
    pub fn instance(&self) -> Option<&str> {
        match self {
            Error::Provision { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from api server", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: Error Classification in Instance Lifecycle
    // ==========================================================================

    /// Story: a rejected Pod surfaces as a provision error with its status code
    #[test]
    fn story_rejected_workload_becomes_provision_error() {
        let rejected = api_error(422, "Invalid");
        let err = Error::provision_from("web-0123456789abcdef", "Pod", rejected);

        assert_eq!(err.status_code(), Some(422));
        assert_eq!(err.instance(), Some("web-0123456789abcdef"));
        assert!(err.to_string().contains("[Pod]"));
        assert!(err.to_string().contains("web-0123456789abcdef"));
        assert!(!err.is_retryable());
    }

    /// Story: unstructured failures carry no status code but stay retryable
    #[test]
    fn story_unstructured_provision_failure() {
        let err = Error::provision("web-0123456789abcdef", "Service", "connection reset");
        assert_eq!(err.status_code(), None);
        assert!(err.is_retryable());
    }

    /// Story: teardown racing a reaper sees 404 and 410 as "gone"
    #[test]
    fn story_not_found_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(410, "Gone").is_not_found());
        assert!(!api_error(409, "AlreadyExists").is_not_found());
        assert!(!Error::internal("boom").is_not_found());
    }

    /// Story: an existing pull secret is a conflict, not a failure
    #[test]
    fn story_conflict_classification() {
        assert!(api_error(409, "AlreadyExists").is_conflict());
        assert!(!api_error(500, "InternalError").is_conflict());
    }

    #[test]
    fn story_docker_errors_are_classified_like_kube_errors() {
        let err = Error::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        });
        assert!(err.is_not_found());
        assert!(err.to_string().contains("docker error"));
    }

    #[test]
    fn story_configuration_errors_are_fatal() {
        let err = Error::configuration_for_path("k8sconfig.yaml", "file does not exist");
        assert!(!err.is_retryable());
        match &err {
            Error::Configuration { path, .. } => {
                assert_eq!(path.as_deref(), Some(std::path::Path::new("k8sconfig.yaml")));
            }
            _ => panic!("Expected Configuration variant"),
        }
    }

    #[test]
    fn test_validation_for_field() {
        let err = Error::validation_for_field("image", "must not be empty");
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("image")),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled() {
        let err = Error::cancelled("create_container");
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("create_container"));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(api_error(500, "InternalError").is_retryable());
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
        assert!(!api_error(403, "Forbidden").is_retryable());
    }
}
