//! CLI command definitions.
//!
//! `env` drives the lifecycle of one environment; `status`, `plan` and
//! `bootstrap` inspect or prepare without changing any record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{debug, warn};

use range_core::{Backend, LifecycleController, RangeConfig, RecordStore};
use range_runner::{CliRunner, CliRunnerOptions, Interrupt, LogHandler};

pub mod bootstrap;
pub mod env;
pub mod plan;
pub mod status;

/// range - cyber range environment orchestrator
#[derive(Parser)]
#[command(name = "range")]
#[command(version, about = "range - cyber range environment orchestrator")]
#[command(long_about = r#"
range builds disposable cyber ranges: networks, hosts, injected
vulnerabilities and generated data, torn down again when done.

COMMANDS:
  env        → deploy_network, setup, compile or teardown one environment
  status     → Show the recorded state of environments
  plan       → Compile a topology and show the artifacts without applying
  bootstrap  → Prepare the cloud project (quota, flavors, images, keypair)

EXIT CODES:
  0 - Success
  1 - General error
  2 - Precondition not met or invalid arguments
  3 - Invalid topology
  4 - Provisioning error
  5 - Configuration error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (defaults to ./range.toml when present)
    #[arg(long, global = true, env = "RANGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log external commands instead of running them
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a lifecycle command against an environment
    Env(env::EnvArgs),

    /// Show recorded environment state
    Status(status::StatusArgs),

    /// Compile a topology without provisioning anything
    Plan(plan::PlanArgs),

    /// Prepare the cloud project for ranges
    Bootstrap,
}

impl Cli {
    pub fn settings(&self) -> Result<RangeConfig> {
        let config = RangeConfig::discover(self.config.as_deref())?;
        debug!("State directory: {:?}", config.state_dir);
        Ok(config)
    }

    /// Controller backed by real processes.
    pub fn controller(&self, config: RangeConfig) -> Result<LifecycleController> {
        let mut options = CliRunnerOptions::new().with_runtime(config.terraform.container_runtime);
        if self.dry_run {
            options = options.dry_run();
        }
        let runner = CliRunner::new(options).with_log_handler(log_file_handler(&config)?);

        let backend = Backend::from_config(Arc::new(runner), &config);
        let store = RecordStore::new(config.records_dir());

        let interrupt = Interrupt::new();
        interrupt.listen_for_ctrl_c();

        Ok(LifecycleController::new(config, store, backend).with_interrupt(interrupt))
    }
}

/// Append every line of external command output to `<state_dir>/logs/range.log`.
fn log_file_handler(config: &RangeConfig) -> Result<LogHandler> {
    let dir = config.logs_dir();
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join("range.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let file = Mutex::new(file);
    Ok(Arc::new(move |line| {
        let entry = format!(
            "{} [{}] {}\n",
            line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            line.stream,
            line.message
        );
        if let Err(e) = file.lock().write_all(entry.as_bytes()) {
            warn!("Could not write command log: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use range_spec::EnvironmentType;

    #[test]
    fn test_env_arguments() {
        let cli = Cli::try_parse_from([
            "range",
            "env",
            "--type",
            "ring",
            "compile",
            "--skip_network",
            "--scale",
            "segments=6",
            "--scale",
            "webserver=3",
            "--workers",
            "8",
        ])
        .unwrap();

        let Commands::Env(args) = &cli.command else {
            panic!("expected env command");
        };
        let request = args.request().unwrap();
        assert_eq!(request.environment, EnvironmentType::Ring);
        assert!(request.skip_network);
        assert!(!request.skip_host);
        assert_eq!(request.scale.ring_segments, 6);
        assert_eq!(request.workers, Some(8));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["range", "status", "--dry-run", "--config", "other.toml"]).unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.config, Some(PathBuf::from("other.toml")));
    }

    #[test]
    fn test_rejects_unknown_environment_and_zero_workers() {
        assert!(Cli::try_parse_from(["range", "env", "--type", "mesh", "setup"]).is_err());
        assert!(Cli::try_parse_from(["range", "env", "--type", "star", "setup", "--workers", "0"]).is_err());
        assert!(Cli::try_parse_from(["range", "env", "--type", "star", "rebuild"]).is_err());
    }

    #[test]
    fn test_log_handler_appends() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = RangeConfig {
            state_dir: temp.path().to_path_buf(),
            ..Default::default()
        };

        let handler = log_file_handler(&config).unwrap();
        handler(range_runner::LogLine {
            timestamp: chrono::Utc::now(),
            stream: range_runner::LogStream::Stdout,
            message: "Apply complete!".to_string(),
        });

        let content = fs::read_to_string(config.logs_dir().join("range.log")).unwrap();
        assert!(content.contains("Apply complete!"));
    }
}
