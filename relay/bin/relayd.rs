#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;

/// Outbound mail relay
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(about = "Deliver queued mail to its next hop", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, instead of searching the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let relay: relay::Relay = ron::from_str(&config_content)?;

    relay.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `RELAY_CONFIG` environment variable
/// 2. ./relay.config.ron (current working directory)
/// 3. /etc/relay/relay.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("RELAY_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "RELAY_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./relay.config.ron"),
        PathBuf::from("/etc/relay/relay.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - RELAY_CONFIG environment variable\n{paths_tried}"
    )
}
