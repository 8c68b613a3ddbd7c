//! Status command - Show recorded environment state.

use anyhow::Result;
use clap::Args;

use range_core::RecordStore;
use range_spec::{EnvironmentRecord, EnvironmentType, JobStatus, ResourceStatus};

use super::Cli;

#[derive(Args)]
pub struct StatusArgs {
    /// Only this environment
    #[arg(long = "type", value_name = "TYPE")]
    environment: Option<EnvironmentType>,

    /// Print the raw records as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(cli: &Cli, args: &StatusArgs) -> Result<()> {
    let config = cli.settings()?;
    let store = RecordStore::new(config.records_dir());

    let environments = match args.environment {
        Some(environment) => vec![environment],
        None => store.list()?,
    };

    let mut records = Vec::new();
    for environment in environments {
        match store.load(environment)? {
            Some(record) => records.push(record),
            None => println!("{}: no record", environment),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() && args.environment.is_none() {
        println!("No environments recorded in {:?}", store.dir());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &EnvironmentRecord) {
    println!("🌐 {} ({})", record.environment_type, record.stage);
    println!(
        "   Updated:    {} (revision {})",
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        record.revision
    );
    println!("   Resources:  {} live", record.handle_count());

    for (name, resource) in &record.resource_handles {
        match resource.status {
            ResourceStatus::Created => {}
            ResourceStatus::Failed => println!(
                "   ❌ {} failed: {}",
                name,
                resource.error.as_deref().unwrap_or("unknown error")
            ),
            ResourceStatus::DeleteFailed => println!(
                "   ⚠️  {} could not be deleted: {}",
                name,
                resource.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    for (host, phases) in &record.host_config_status {
        let failed: Vec<_> = phases
            .iter()
            .filter(|(_, status)| **status == JobStatus::Failed)
            .map(|(phase, _)| phase.as_str())
            .collect();
        if !failed.is_empty() {
            println!("   ❌ {} failed {}", host, failed.join(", "));
        }
    }

    if !record.snapshots.is_empty() {
        println!("   Snapshots:  {}", record.snapshots.len());
    }
}
