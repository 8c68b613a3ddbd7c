//! Error types for the lifecycle controller.

use thiserror::Error;

use range_ansible::ConfigurationError;
use range_iac::IacError;
use range_spec::{InvalidTopologyError, SpecError};

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by lifecycle commands.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(InvalidTopologyError),

    #[error("Compilation failed: {0}")]
    Compilation(InvalidTopologyError),

    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(IacError),

    #[error("Configuration failed: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Spec error: {0}")]
    Spec(SpecError),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Record error for {environment}: {message}")]
    Record { environment: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Error category, used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidTopology,
    Compilation,
    Precondition,
    Provisioning,
    Configuration,
    Other,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidTopology(_) => ErrorKind::InvalidTopology,
            CoreError::Compilation(_) => ErrorKind::Compilation,
            CoreError::Precondition(_) => ErrorKind::Precondition,
            CoreError::Provisioning(_) => ErrorKind::Provisioning,
            CoreError::Configuration(_) => ErrorKind::Configuration,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the failure was an external call running out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            CoreError::Provisioning(e) => e.is_timeout(),
            CoreError::Configuration(e) => e.is_timeout(),
            _ => false,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        CoreError::Precondition(message.into())
    }
}

impl From<IacError> for CoreError {
    fn from(e: IacError) -> Self {
        match e {
            IacError::Compilation(violations) => CoreError::Compilation(violations),
            other => CoreError::Provisioning(other),
        }
    }
}

impl From<SpecError> for CoreError {
    fn from(e: SpecError) -> Self {
        match e {
            SpecError::InvalidTopology(violations) => CoreError::InvalidTopology(violations),
            other => CoreError::Spec(other),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Settings(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use range_spec::TopologyViolation;

    #[test]
    fn test_kinds() {
        let invalid = InvalidTopologyError {
            violations: vec![TopologyViolation::DuplicateNetwork("lan".to_string())],
        };
        assert_eq!(
            CoreError::from(SpecError::InvalidTopology(invalid.clone())).kind(),
            ErrorKind::InvalidTopology
        );
        assert_eq!(
            CoreError::from(IacError::Compilation(invalid)).kind(),
            ErrorKind::Compilation
        );
        assert_eq!(
            CoreError::from(IacError::Interrupted).kind(),
            ErrorKind::Provisioning
        );
        assert_eq!(CoreError::precondition("x").kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_provisioning_timeout() {
        let err = CoreError::from(IacError::Timeout {
            resource: "host:web".to_string(),
            seconds: 30,
        });
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Provisioning);
    }
}
