//! range CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Precondition not met or invalid arguments
//! - 3: Invalid topology or compilation failure
//! - 4: Provisioning error
//! - 5: Configuration error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use range_core::{CoreError, ErrorKind};
use range_spec::SpecError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const PRECONDITION: u8 = 2;
    pub const INVALID_TOPOLOGY: u8 = 3;
    pub const PROVISIONING_ERROR: u8 = 4;
    pub const CONFIGURATION_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Env(args) => commands::env::execute(&cli, args).await,
        Commands::Status(args) => commands::status::execute(&cli, args),
        Commands::Plan(args) => commands::plan::execute(&cli, args),
        Commands::Bootstrap => commands::bootstrap::execute(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "range=debug,info" } else { "range=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Ignored when a subscriber is already installed
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}

/// Map an error to its exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return match core {
            CoreError::Spec(_) | CoreError::Settings(_) => ExitCodes::PRECONDITION,
            other => match other.kind() {
                ErrorKind::Precondition => ExitCodes::PRECONDITION,
                ErrorKind::InvalidTopology | ErrorKind::Compilation => ExitCodes::INVALID_TOPOLOGY,
                ErrorKind::Provisioning => ExitCodes::PROVISIONING_ERROR,
                ErrorKind::Configuration => ExitCodes::CONFIGURATION_ERROR,
                ErrorKind::Other => ExitCodes::GENERAL_ERROR,
            },
        };
    }
    match e.downcast_ref::<SpecError>() {
        Some(SpecError::InvalidTopology(_)) => ExitCodes::INVALID_TOPOLOGY,
        Some(_) => ExitCodes::PRECONDITION,
        None => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let precondition = anyhow::Error::from(CoreError::precondition("locked"));
        assert_eq!(categorize_error(&precondition), ExitCodes::PRECONDITION);

        let scale = anyhow::Error::from(SpecError::InvalidScale("x".to_string()));
        assert_eq!(categorize_error(&scale), ExitCodes::PRECONDITION);

        let other = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&other), ExitCodes::GENERAL_ERROR);
    }

    #[test]
    fn test_context_keeps_the_kind() {
        let err = anyhow::Error::from(CoreError::precondition("locked")).context("env setup");
        assert_eq!(categorize_error(&err), ExitCodes::PRECONDITION);
    }
}
