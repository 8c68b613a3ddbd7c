//! # range_runner
//!
//! External tool execution wrapper for the range orchestrator.
//!
//! Every collaborator the orchestrator drives (Terraform, the OpenStack CLI,
//! `ansible-playbook`) is an external program. This crate runs them with a
//! timeout, captures their output, and optionally wraps them in a container
//! image so the host does not need the tool installed.
//!
//! # Features
//!
//! - **Command specs**: program, arguments, environment, working directory
//! - **Timeouts**: a timed-out run is killed and reported, never retried
//! - **Container wrapping**: run a tool image with Docker or Podman
//! - **Dry-run mode**: log commands without executing them
//! - **Output capture**: lines go to a log handler as they arrive
//! - **Interrupt flag**: shared operator-interrupt signal for drivers
//! - **Mock runner**: for testing without the real tools
//!
//! # Example
//!
//! ```rust,no_run
//! use range_runner::{CliRunner, CliRunnerOptions, CommandRunner, CommandSpec, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = CliRunner::new(CliRunnerOptions::default());
//!
//!     let spec = CommandSpec::new("terraform")
//!         .arg("version")
//!         .workdir("/tmp");
//!
//!     let result = runner.run(&spec, &RunConfig::default().timeout(30)).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod command;
pub mod error;
pub mod interrupt;
pub mod mock;
pub mod runner;

pub use cli::{CliRunner, CliRunnerOptions, ContainerRuntime, LogHandler, LogLine, LogStream};
pub use command::{CommandSpec, ContainerImage, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use interrupt::Interrupt;
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult};
