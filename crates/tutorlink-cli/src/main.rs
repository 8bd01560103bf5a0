//! tutorlink replay binary.
//!
//! Plays a RON scenario against the in-memory platform: the viewer signs
//! in, their dashboard loads while the scenario's `during_load` steps fire,
//! then the remaining steps run against the live dashboard. The final
//! collections are printed as JSON on stdout.
//!
//! Usage:
//!   cargo run -p tutorlink-cli -- demos/scenario.ron
//!   RUST_LOG=tutorlink_client=debug cargo run -p tutorlink-cli -- demos/scenario.ron --compact

mod replay;
mod scenario;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};
use tutorlink_client::{ClientConfig, install_global};

use crate::replay::Replay;
use crate::scenario::Scenario;

/// Replay a dashboard scenario and print the resulting view.
#[derive(Parser, Debug)]
#[command(name = "tutorlink")]
#[command(about = "Replay tutorlink dashboard scenarios against an in-memory platform")]
struct Args {
    /// Scenario file (RON)
    scenario: PathBuf,

    /// Client config file (RON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to let channel deliveries settle after each step, in milliseconds
    #[arg(long, default_value_t = 25)]
    settle_ms: u64,

    /// Print JSON on one line
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs to stderr; stdout carries the report
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("loading scenario {}", args.scenario.display()))?;
    let config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    tracing::info!(platform = %config.platform_url, "using in-memory platform");

    let replay = Replay::new(&scenario, Duration::from_millis(args.settle_ms))?;
    let client = install_global(replay.platform().client())?.clone();
    let report = replay.run(&scenario, client, config).await?;

    let json = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{json}");
    Ok(())
}
