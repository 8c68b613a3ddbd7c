//! Bootstrap command - Prepare the cloud project for ranges.

use anyhow::Result;
use tracing::info;

use range_iac::StepOutcome;

use super::Cli;

pub async fn execute(cli: &Cli) -> Result<()> {
    let config = cli.settings()?;
    info!("Bootstrapping project {}", config.openstack.project);

    let controller = cli.controller(config)?;
    let steps = controller.bootstrap().await?;

    println!("🔧 Bootstrap complete");
    for (step, outcome) in &steps {
        match outcome {
            StepOutcome::Created(id) => println!("   ✅ {} ({})", step, id),
            StepOutcome::AlreadyPresent => println!("   ➖ {} already present", step),
        }
    }
    Ok(())
}
