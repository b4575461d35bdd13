//! fleetswap — blue-green load balancer cutover for auto scaling fleets.
//!
//! # Usage
//!
//! ```text
//! fleetswap simulate --fleet fleet.toml
//! fleetswap discover --fleet fleet.toml --tag fleet-state=live
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use fleetswap_cli::{run_simulation, FleetFile, SimulationOptions};
use fleetswap_discovery::find_groups_by_tags;

#[derive(Parser)]
#[command(
    name = "fleetswap",
    about = "Blue-green load balancer cutover for auto scaling fleets",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rehearse a full cutover workflow against an in-memory provider.
    Simulate {
        /// Fleet description file.
        #[arg(long)]
        fleet: PathBuf,

        /// Override the health wait budget, in seconds.
        #[arg(long)]
        wait_timeout: Option<u64>,

        /// Override the health poll interval, in seconds.
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List a fleet description's groups matching tag filters.
    Discover {
        /// Fleet description file.
        #[arg(long)]
        fleet: PathBuf,

        /// Tag filter, key=value. Repeatable.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Emit the groups as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetswap=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            fleet,
            wait_timeout,
            poll_interval,
            json,
        } => {
            let file = FleetFile::from_path(&fleet)?;
            let options = SimulationOptions {
                wait_timeout: wait_timeout.map(Duration::from_secs),
                poll_interval: poll_interval.map(Duration::from_secs),
            };

            let report = run_simulation(&file, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "promoted {} (retired: {})",
                    report.outcome.promoted,
                    report.outcome.retired.as_deref().unwrap_or("none")
                );
                println!("moved: {}", report.moved.join(", "));
                if !report.standby_attached.is_empty() {
                    println!("standby: {}", report.standby_attached.join(", "));
                }
                for (group, attached) in &report.final_attachments {
                    let list: Vec<&str> = attached.iter().map(String::as_str).collect();
                    println!("{group}: [{}]", list.join(", "));
                }
            }
            Ok(())
        }
        Command::Discover { fleet, tags, json } => {
            let file = FleetFile::from_path(&fleet)?;
            let provider = file.build_provider();

            let mut filter: BTreeMap<String, String> = file.service_filter();
            filter.extend(tags);

            let groups = find_groups_by_tags(&provider, &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else if groups.is_empty() {
                println!("no groups match");
            } else {
                for group in &groups {
                    let role = group
                        .tags
                        .get(fleetswap_discovery::STATE_TAG)
                        .map(String::as_str)
                        .unwrap_or("-");
                    println!("{}\t{}\t{:?}", group.id, role, group.health_check);
                }
            }
            Ok(())
        }
    }
}
