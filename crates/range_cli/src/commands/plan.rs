//! Plan command - Compile a topology and show what would be provisioned.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use range_core::{terraform_renderer, EnvRequest};
use range_iac::{CompiledEnvironment, TerraformRenderer, PROVIDERS_FILE};
use range_spec::{ConfigPhase, EnvironmentType, Scale};

use super::Cli;

#[derive(Args)]
pub struct PlanArgs {
    /// Environment shape
    #[arg(long = "type", value_name = "TYPE")]
    environment: EnvironmentType,

    /// Override a host count (role=count, or segments=N for ring)
    #[arg(long, value_name = "ROLE=COUNT")]
    scale: Vec<String>,

    /// Topology file to use instead of the generated layout
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Write the rendered Terraform files here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the compiled artifacts and jobs as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(cli: &Cli, args: &PlanArgs) -> Result<()> {
    let config = cli.settings()?;
    let mut request = EnvRequest::new(args.environment).with_scale(Scale::parse_all(&args.scale)?);
    if let Some(path) = &args.topology {
        request = request.with_topology_file(path);
    }

    let controller = cli.controller(config.clone())?;
    let compiled = controller.plan(&request)?;

    if let Some(dir) = &args.output {
        write_terraform(&terraform_renderer(&config), &compiled, dir)?;
        println!("📁 Terraform written to {:?}", dir);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
    } else {
        print_plan(args.environment, &compiled);
    }
    Ok(())
}

fn write_terraform(renderer: &TerraformRenderer, compiled: &CompiledEnvironment, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    fs::write(
        dir.join(PROVIDERS_FILE),
        serde_json::to_string_pretty(&renderer.render_providers())?,
    )?;
    for artifact in &compiled.artifacts {
        let path = dir.join(TerraformRenderer::file_name(&artifact.name));
        fs::write(&path, renderer.render_string(artifact)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }
    info!("Rendered {} artifact(s) for {}", compiled.artifacts.len(), renderer.substrate());
    Ok(())
}

fn print_plan(environment: EnvironmentType, compiled: &CompiledEnvironment) {
    println!("📋 Plan for {}", environment);
    println!();
    println!("Artifacts ({}):", compiled.artifacts.len());
    for artifact in &compiled.artifacts {
        println!("   [{}] {}", artifact.tier, artifact.name);
    }

    println!();
    println!("Host jobs ({}):", compiled.jobs.len());
    for job in &compiled.jobs {
        let phases: Vec<String> = ConfigPhase::ALL
            .into_iter()
            .map(|phase| {
                let names: Vec<&str> = job.actions(phase).iter().map(|a| a.name()).collect();
                format!("{}: {}", phase, if names.is_empty() { "-".to_string() } else { names.join(", ") })
            })
            .collect();
        println!("   {} ({})", job.host, job.role);
        println!("      {}", phases.join(" | "));
    }
}
