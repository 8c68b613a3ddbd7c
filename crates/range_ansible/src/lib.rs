//! # range_ansible
//!
//! Host configuration for the range orchestrator.
//!
//! Each host job carries the actions of every configuration phase. The
//! [`ConfigurationDriver`] runs one phase across all hosts on a bounded pool
//! of workers and records a per-host status in the environment record.
//!
//! ## Features
//!
//! - Bounded concurrent configuration with per-host timeouts
//! - `ansible-playbook` runner with inline inventory and SSH jump host
//! - Failures aggregated per host, never stopping other hosts
//! - Bounded retries for flaky actions, resetting the host in between
//! - Recording runner double for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use range_ansible::{AnsibleRunner, ConfigurationDriver};
//! use range_runner::{CliRunner, CliRunnerOptions};
//! use range_spec::{ConfigPhase, EnvironmentRecord, EnvironmentType, HostJob, Scale};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = EnvironmentType::Star.topology(&Scale::default())?;
//! let jobs: Vec<HostJob> = topology.hosts.iter().map(HostJob::for_host).collect();
//!
//! let runner = AnsibleRunner::new(Arc::new(CliRunner::new(CliRunnerOptions::default())), "ansible");
//! let driver = ConfigurationDriver::new(Arc::new(runner)).with_workers(4);
//!
//! let mut record = EnvironmentRecord::new(EnvironmentType::Star);
//! driver.configure(&jobs, ConfigPhase::Base, &mut record).await?;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod mock;
pub mod reset;
pub mod runner;

pub use driver::{ConfigurationDriver, ConfigureReport};
pub use error::{ConfigResult, ConfigurationError, HostFailure};
pub use mock::{ConfigCall, MockConfigRunner, MockHostReset};
pub use reset::HostReset;
pub use runner::{ActionOutcome, AnsibleRunner, ConfigRunner, RunContext};
