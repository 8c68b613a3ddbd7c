//! Recording command runner for tests.
//!
//! Lets the Terraform, OpenStack and Ansible wrappers be tested without
//! any of those tools installed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::command::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Canned process outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A recorded `run` call.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub command_line: String,
}

/// Runner double.
///
/// A call gets the response of the first `respond_to` pattern found in its
/// command line, else the next queued response, else an empty success.
#[derive(Clone, Default)]
pub struct MockRunner {
    programs: Arc<RwLock<BTreeSet<String>>>,
    rules: Arc<RwLock<Vec<(String, MockResponse)>>>,
    queue: Arc<RwLock<VecDeque<MockResponse>>>,
    calls: Arc<RwLock<Vec<CapturedCall>>>,
    failure: Arc<RwLock<Option<String>>>,
    timeout: Arc<AtomicBool>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `program` as installed.
    pub fn with_program(self, program: impl Into<String>) -> Self {
        self.programs.write().insert(program.into());
        self
    }

    /// Answer any command line containing `pattern` with `response`.
    pub fn respond_to(self, pattern: impl Into<String>, response: MockResponse) -> Self {
        self.rules.write().push((pattern.into(), response));
        self
    }

    /// Queue a response for the next call no rule matches.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.queue.write().push_back(response);
        self
    }

    /// Fail every call before it runs.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.failure.write() = Some(message.into());
        self
    }

    /// Time out every call.
    pub fn simulate_timeout(self) -> Self {
        self.timeout.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<CapturedCall> {
        self.calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// Calls whose command line contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<CapturedCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.command_line.contains(pattern))
            .cloned()
            .collect()
    }

    fn response_for(&self, command_line: &str) -> MockResponse {
        let matched = self
            .rules
            .read()
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        matched
            .or_else(|| self.queue.write().pop_front())
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        Ok(self.programs.read().contains(program))
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let command = spec.command_line();
        self.calls.write().push(CapturedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            workdir: spec.workdir.clone(),
            command_line: command.clone(),
        });

        if let Some(message) = self.failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(message));
        }
        if self.timeout.load(Ordering::SeqCst) {
            return Err(RunnerError::Timeout {
                command,
                seconds: run_config.timeout_seconds,
            });
        }

        let response = self.response_for(&command);
        let now = Utc::now();
        Ok(ExecutionResult {
            command,
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        })
    }
}
