//! Configuration runner seam and the `ansible-playbook` implementation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use range_runner::{CommandRunner, CommandSpec, RunConfig, RunnerError};
use range_spec::ConfigAction;

use crate::error::ConfigResult;

/// Per-host settings for one runner invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Logical host name.
    pub host: String,
    /// SSH jump host (the management host's floating address).
    pub jump_host: Option<String>,
    /// Budget for each action.
    pub timeout_seconds: u64,
}

impl RunContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            jump_host: None,
            timeout_seconds: 1800,
        }
    }

    pub fn with_jump_host(mut self, jump_host: Option<String>) -> Self {
        self.jump_host = jump_host;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Result of one configuration action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    pub detail: Option<String>,
    pub timed_out: bool,
}

impl ActionOutcome {
    pub fn succeeded(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: true,
            detail: None,
            timed_out: false,
        }
    }

    pub fn failed(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: false,
            detail: Some(detail.into()),
            timed_out: false,
        }
    }

    pub fn timed_out(action: impl Into<String>, seconds: u64) -> Self {
        Self {
            action: action.into(),
            success: false,
            detail: Some(format!("timed out after {}s", seconds)),
            timed_out: true,
        }
    }
}

/// Runs an ordered list of configuration actions against one host.
///
/// Returns one outcome per action attempted; a runner stops at the first
/// failed action, so a failure is always the last outcome.
#[async_trait]
pub trait ConfigRunner: Send + Sync {
    async fn run(&self, address: &str, actions: &[ConfigAction], context: &RunContext) -> ConfigResult<Vec<ActionOutcome>>;
}

/// [`ConfigRunner`] that invokes `ansible-playbook` once per action with an
/// inline single-host inventory.
pub struct AnsibleRunner {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    playbook_dir: PathBuf,
    private_key: Option<PathBuf>,
    remote_user: String,
    jump_user: String,
}

impl AnsibleRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, playbook_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: "ansible-playbook".to_string(),
            playbook_dir: playbook_dir.into(),
            private_key: None,
            remote_user: "ubuntu".to_string(),
            jump_user: "ubuntu".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_private_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = user.into();
        self
    }

    pub fn with_jump_user(mut self, user: impl Into<String>) -> Self {
        self.jump_user = user.into();
        self
    }

    /// Extra variables for one action, including SSH settings.
    pub fn extra_vars(&self, address: &str, action: &ConfigAction, context: &RunContext) -> Value {
        let mut vars = action.extra_vars(address);
        vars.insert("host_name".to_string(), json!(context.host));

        let mut ssh_args = vec!["-o StrictHostKeyChecking=no".to_string()];
        if let Some(jump) = &context.jump_host {
            ssh_args.push(format!("-o ProxyJump={}@{}", self.jump_user, jump));
        }
        vars.insert("ansible_ssh_common_args".to_string(), json!(ssh_args.join(" ")));

        json!(vars)
    }

    fn command(&self, address: &str, vars_file: &std::path::Path, action: &ConfigAction) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary)
            .arg("-i")
            .arg(format!("{},", address))
            .arg("--user")
            .arg(&self.remote_user);
        if let Some(key) = &self.private_key {
            spec = spec.arg("--private-key").arg(key.to_string_lossy());
        }
        spec.arg("--extra-vars")
            .arg(format!("@{}", vars_file.to_string_lossy()))
            .arg(self.playbook_dir.join(action.playbook()).to_string_lossy())
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_NOCOLOR", "1")
    }
}

#[async_trait]
impl ConfigRunner for AnsibleRunner {
    async fn run(&self, address: &str, actions: &[ConfigAction], context: &RunContext) -> ConfigResult<Vec<ActionOutcome>> {
        let mut outcomes = Vec::with_capacity(actions.len());

        for action in actions {
            let mut vars_file = tempfile::Builder::new()
                .prefix("range-vars-")
                .suffix(".json")
                .tempfile()?;
            vars_file.write_all(serde_json::to_string(&self.extra_vars(address, action, context))?.as_bytes())?;
            vars_file.flush()?;

            let spec = self.command(address, vars_file.path(), action);
            debug!("{}: {}", context.host, spec.command_line());

            let outcome = match self
                .runner
                .run(&spec, &RunConfig::default().timeout(context.timeout_seconds))
                .await
            {
                Ok(result) if result.success() => ActionOutcome::succeeded(action.name()),
                Ok(result) => ActionOutcome::failed(action.name(), result.error_summary()),
                Err(RunnerError::Timeout { seconds, .. }) => ActionOutcome::timed_out(action.name(), seconds),
                Err(e) => return Err(e.into()),
            };

            let failed = !outcome.success;
            if failed {
                warn!("{}: {} failed", context.host, action.name());
            } else {
                info!("{}: {} done", context.host, action.name());
            }
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use range_runner::{MockResponse, MockRunner};

    fn actions() -> Vec<ConfigAction> {
        vec![
            ConfigAction::CheckHostUp,
            ConfigAction::InstallBasePackages,
            ConfigAction::WriteablePasswd,
        ]
    }

    #[tokio::test]
    async fn test_runs_each_action_against_inline_inventory() {
        let mock = Arc::new(MockRunner::new());
        let runner = AnsibleRunner::new(mock.clone(), "/opt/range/ansible").with_private_key("/keys/range");

        let outcomes = runner
            .run("10.0.2.10", &actions(), &RunContext::new("database_1"))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].program, "ansible-playbook");
        assert_eq!(calls[0].args[0..2], ["-i".to_string(), "10.0.2.10,".to_string()]);
        assert!(calls[0].args.contains(&"/keys/range".to_string()));
        assert!(calls[1].command_line.ends_with("install_base_packages.yml"));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let mock = Arc::new(
            MockRunner::new().respond_to(
                "install_base_packages",
                MockResponse::failure(2, "fatal: [10.0.2.10]: UNREACHABLE!"),
            ),
        );
        let runner = AnsibleRunner::new(mock.clone(), "/opt/range/ansible");

        let outcomes = runner
            .run("10.0.2.10", &actions(), &RunContext::new("database_1"))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].detail.as_deref().unwrap_or_default().contains("UNREACHABLE"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_an_outcome() {
        let mock = Arc::new(MockRunner::new().simulate_timeout());
        let runner = AnsibleRunner::new(mock, "/opt/range/ansible");

        let outcomes = runner
            .run("10.0.1.5", &actions(), &RunContext::new("webserver_1").with_timeout(5))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].timed_out);
    }

    #[test]
    fn test_extra_vars_carry_jump_host() {
        let runner = AnsibleRunner::new(Arc::new(MockRunner::new()), "/opt/range/ansible");
        let context = RunContext::new("employee_1").with_jump_host(Some("172.24.4.20".to_string()));
        let action = ConfigAction::GenerateData {
            dataset: "employee_credentials".to_string(),
            user: "employee_1_user".to_string(),
        };

        let vars = runner.extra_vars("10.0.3.7", &action, &context);
        assert_eq!(vars["host"], "10.0.3.7");
        assert_eq!(vars["host_name"], "employee_1");
        assert_eq!(vars["dataset"], "employee_credentials");
        assert!(vars["ansible_ssh_common_args"]
            .as_str()
            .unwrap()
            .contains("ProxyJump=ubuntu@172.24.4.20"));
    }
}
