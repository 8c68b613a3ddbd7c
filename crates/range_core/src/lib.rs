//! # range_core
//!
//! Environment lifecycle controller for the range orchestrator.
//!
//! The controller moves an environment through its stages
//! (`Absent → NetworkDeployed → HostsConfigured → VulnerabilitiesInjected →
//! DataGenerated → TornDown`) by sequencing the provisioning and
//! configuration drivers, and persists the environment record after every
//! step so an interrupted or failed command can simply be re-run.
//!
//! # Architecture
//!
//! - **Store**: one versioned JSON record per environment, with an
//!   in-process lock per environment
//! - **Backend**: the provisioner, configuration runner and cloud API
//! - **Controller**: preconditions, skip flags and stage transitions
//! - **Config**: `range.toml` settings with defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use range_core::{Backend, Command, EnvRequest, LifecycleController, RangeConfig, RecordStore};
//! use range_runner::{CliRunner, CliRunnerOptions};
//! use range_spec::EnvironmentType;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RangeConfig::discover(None)?;
//! let runner = Arc::new(CliRunner::new(CliRunnerOptions::default()));
//! let controller = LifecycleController::new(
//!     config.clone(),
//!     RecordStore::new(config.records_dir()),
//!     Backend::from_config(runner, &config),
//! );
//!
//! let report = controller
//!     .execute(Command::Compile, &EnvRequest::new(EnvironmentType::Star))
//!     .await?;
//! println!("{} is {}", report.environment, report.stage);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod store;

pub use backend::{terraform_renderer, Backend, ProvisionerFactory, SharedProvisioner, TerraformFactory};
pub use config::{
    AnsibleSettings, OpenStackSettings, RangeConfig, SnapshotSettings, TerraformSettings, TimeoutSettings,
    CONFIG_FILE,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use lifecycle::{Command, CommandReport, EnvRequest, LifecycleController};
pub use store::{EnvironmentLock, RecordStore};
