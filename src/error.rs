//! Error types for SafeExec

use thiserror::Error;

/// Result type alias using SafeExec's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SafeExec
#[derive(Error, Debug)]
pub enum Error {
    /// No isolation backend can serve the call
    #[error("No sandbox backend available")]
    NoBackendAvailable,

    /// A single backend failed for availability reasons (tool missing, permission denied, engine down)
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A path or `cd` tried to leave the workspace root
    #[error("Workspace path violation: {0}")]
    WorkspacePathViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a backend availability failure
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should demote the backend that produced it
    pub fn is_availability(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. } | Error::NoBackendAvailable)
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::WorkspacePathViolation(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::unavailable("namespace", "bwrap not found").is_availability());
        assert!(Error::NoBackendAvailable.is_availability());
        assert!(!Error::Internal("boom".into()).is_availability());
        assert!(Error::WorkspacePathViolation("..".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::unavailable("container", "ping failed");
        assert_eq!(err.to_string(), "Backend 'container' unavailable: ping failed");
    }
}
