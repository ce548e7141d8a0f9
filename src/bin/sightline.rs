//! Sightline CLI
//!
//! Runs the coverage batch described by a TOML configuration file and
//! prints the run report as JSON.
//!
//! # Usage
//!
//! ```bash
//! sightline compute --config config.toml
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log level (default: info)

use std::env;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sightline::config::PipelineConfig;
use sightline::pipeline;

const USAGE: &str = "usage: sightline compute [--config <path>]";

fn parse_args() -> Result<(String, String), String> {
    let mut args = env::args().skip(1);
    let command = args.next().ok_or(USAGE)?;

    let mut config_path = "config.toml".to_string();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = args.next().ok_or("--config requires a path")?;
            }
            other => return Err(format!("unknown argument '{}'\n{}", other, USAGE)),
        }
    }
    Ok((command, config_path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .init();

    let (command, config_path) = parse_args().map_err(|e| anyhow::anyhow!(e))?;
    if command != "compute" {
        anyhow::bail!("unknown command '{}'\n{}", command, USAGE);
    }

    let config = PipelineConfig::from_file(&config_path)?;
    info!(config = %config_path, "starting coverage batch");

    let report = pipeline::run_from_config(&config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
