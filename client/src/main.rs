use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod forward;
mod manager;
mod poller;

use config::{HomeConfig, SystemConfig};
use manager::PollerManager;

#[derive(Parser)]
#[command(name = "homeproxy")]
#[command(author = "HomeProxy Team")]
#[command(version = "0.1.0")]
#[command(about = "Serve a local web server through a HomeProxy relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay base URL
    #[arg(short, long, default_value = "http://localhost:8080")]
    relay: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one local web server
    Serve {
        /// Base URL of the local web server
        upstream: String,

        /// Session id to declare to the relay
        #[arg(short, long, default_value = "home")]
        system: String,
    },
    /// Serve every system listed in a config file
    Start {
        /// Config file (defaults to homeproxy.yml in the current or home directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "homeproxy=debug" } else { "homeproxy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match cli.command {
        Commands::Serve { upstream, system } => {
            let config = HomeConfig::single(&cli.relay, SystemConfig::new(system, upstream));
            config.validate()?;
            config
        }
        Commands::Start { config } => {
            let path = config
                .or_else(HomeConfig::find_config)
                .context("No config file given and no homeproxy.yml found")?;
            HomeConfig::load(&path)?
        }
    };

    let mut manager = PollerManager::new(config);
    manager.start_all()?;
    manager.wait_for_shutdown().await;

    Ok(())
}
