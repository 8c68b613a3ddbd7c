//! Error types for host configuration.

use std::fmt;

use thiserror::Error;

use range_spec::ConfigPhase;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Errors that can occur while configuring hosts.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("{phase} configuration failed on {} host(s):{}", .failures.len(), FailureList(.failures))]
    HostsFailed {
        phase: ConfigPhase,
        failures: Vec<HostFailure>,
    },

    #[error("Interrupted before all hosts were configured")]
    Interrupted,

    #[error("Could not reset {host}: {detail}")]
    Reset { host: String, detail: String },

    #[error("Runner error: {0}")]
    Runner(#[from] range_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigurationError {
    /// Whether every failed host timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            ConfigurationError::HostsFailed { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|f| f.timed_out)
            }
            ConfigurationError::Runner(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// One host whose configuration failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub host: String,
    /// First action that failed, when the runner got that far.
    pub action: Option<String>,
    pub detail: String,
    pub timed_out: bool,
}

struct FailureList<'a>(&'a [HostFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in self.0 {
            match &failure.action {
                Some(action) => write!(f, "\n  - {} ({}): {}", failure.host, action, failure.detail)?,
                None => write!(f, "\n  - {}: {}", failure.host, failure.detail)?,
            }
        }
        Ok(())
    }
}
