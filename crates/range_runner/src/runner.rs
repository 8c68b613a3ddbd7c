//! The seam every driver runs external tools through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{CommandSpec, RunConfig};
use crate::error::RunnerResult;

/// Outcome of a tool that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Rendered command line
    pub command: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, skipping whichever is empty.
    pub fn combined_output(&self) -> String {
        [self.stdout.as_str(), self.stderr.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Last non-empty stderr line, falling back to stdout.
    pub fn error_summary(&self) -> String {
        fn last_line(text: &str) -> Option<&str> {
            text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
        }
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or("Unknown error")
            .to_string()
    }
}

/// Executes external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Whether `program --version` succeeds.
    async fn is_available(&self, program: &str) -> RunnerResult<bool>;

    /// Run to completion or until the configured timeout.
    ///
    /// A non-zero exit code is returned as a result; callers inspect
    /// [`ExecutionResult::success`].
    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stdout: &str, stderr: &str, exit_code: i64) -> ExecutionResult {
        ExecutionResult {
            command: "terraform apply".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(result("out", "", 0).combined_output(), "out");
        assert_eq!(result("", "err", 1).combined_output(), "err");
        assert_eq!(result("out", "err", 1).combined_output(), "out\nerr");
    }

    #[test]
    fn test_error_summary_prefers_stderr() {
        let r = result("Plan: 1 to add", "Error: quota exceeded\n\n", 1);
        assert_eq!(r.error_summary(), "Error: quota exceeded");

        let r = result("", "", 1);
        assert_eq!(r.error_summary(), "Unknown error");
    }
}
