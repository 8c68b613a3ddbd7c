//! Env command - Run a lifecycle command against one environment.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::info;

use range_core::{Command, CommandReport, EnvRequest};
use range_spec::{EnvironmentType, Scale};

use super::Cli;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Action {
    /// Networks, security groups and the router
    #[value(name = "deploy_network")]
    DeployNetwork,
    /// Compute instances and floating IPs
    Setup,
    /// Everything up to generated data
    Compile,
    /// Delete every recorded resource
    Teardown,
}

impl From<Action> for Command {
    fn from(action: Action) -> Self {
        match action {
            Action::DeployNetwork => Command::DeployNetwork,
            Action::Setup => Command::Setup,
            Action::Compile => Command::Compile,
            Action::Teardown => Command::Teardown,
        }
    }
}

#[derive(Args)]
pub struct EnvArgs {
    /// Environment shape
    #[arg(long = "type", value_name = "TYPE")]
    environment: EnvironmentType,

    /// Lifecycle command
    #[arg(value_enum)]
    action: Action,

    /// Reuse the recorded network tiers
    #[arg(long = "skip_network")]
    skip_network: bool,

    /// Reuse the recorded hosts
    #[arg(long = "skip_host")]
    skip_host: bool,

    /// Override a host count (role=count, or segments=N for ring)
    #[arg(long, value_name = "ROLE=COUNT")]
    scale: Vec<String>,

    /// Topology file to use instead of the generated layout
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Hosts configured in parallel
    #[arg(long, value_parser = parse_workers)]
    workers: Option<usize>,
}

impl EnvArgs {
    pub fn request(&self) -> Result<EnvRequest> {
        let mut request = EnvRequest::new(self.environment)
            .with_scale(Scale::parse_all(&self.scale)?)
            .skip_network(self.skip_network)
            .skip_host(self.skip_host)
            .with_workers(self.workers);
        if let Some(path) = &self.topology {
            request = request.with_topology_file(path);
        }
        Ok(request)
    }
}

fn parse_workers(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("at least one worker is required".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

pub async fn execute(cli: &Cli, args: &EnvArgs) -> Result<()> {
    let request = args.request()?;
    let command = Command::from(args.action);
    info!("{} on the {} environment", command, request.environment);

    let config = cli.settings()?;
    let controller = cli.controller(config)?;
    let report = controller.execute(command, &request).await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &CommandReport) {
    println!("✅ {} finished on {}", report.command, report.environment);
    println!("   Run:        {}", report.run_id);
    println!("   Stage:      {}", report.stage);
    println!("   Resources:  {} live", report.handles);
    if report.created > 0 {
        println!("   Created:    {}", report.created);
    }
    if report.deleted > 0 {
        println!("   Deleted:    {}", report.deleted);
    }
    if report.configured > 0 {
        println!("   Configured: {} host(s)", report.configured);
    }
    if report.restored > 0 {
        println!("   Restored:   {} host(s)", report.restored);
    }
    if report.snapshots > 0 {
        println!("   Snapshots:  {}", report.snapshots);
    }
}
