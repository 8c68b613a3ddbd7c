//! Error types for IaC module.

use std::fmt;

use thiserror::Error;

use range_spec::InvalidTopologyError;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Result type alias for cloud API calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur during IaC operations.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Compilation failed: {0}")]
    Compilation(InvalidTopologyError),

    #[error("Provisioning {resource} failed: {detail}")]
    Provisioning { resource: String, detail: String },

    #[error("{resource} timed out after {seconds}s")]
    Timeout { resource: String, seconds: u64 },

    #[error("Apply failed for {} resource(s):{}", .failures.len(), FailureList(.failures))]
    ApplyFailed { failures: Vec<ResourceFailure> },

    #[error("Teardown failed for {} resource(s):{}", .failures.len(), FailureList(.failures))]
    TeardownFailed { failures: Vec<ResourceFailure> },

    #[error("Interrupted before all resources were processed")]
    Interrupted,

    #[error("Terraform not available: {0}")]
    TerraformNotAvailable(String),

    #[error("Cloud API error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Runner error: {0}")]
    Runner(#[from] range_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IacError {
    /// Whether the failure (or every aggregated failure) was a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            IacError::Timeout { .. } => true,
            IacError::Runner(e) => e.is_timeout(),
            IacError::ApplyFailed { failures } | IacError::TeardownFailed { failures } => {
                !failures.is_empty() && failures.iter().all(|f| f.timed_out)
            }
            _ => false,
        }
    }
}

/// One resource that could not be created or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub name: String,
    pub detail: String,
    pub timed_out: bool,
}

struct FailureList<'a>(&'a [ResourceFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in self.0 {
            write!(f, "\n  - {}: {}", failure.name, failure.detail)?;
        }
        Ok(())
    }
}

/// Structured error from the cloud API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CloudError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists(_))
    }
}
