//! rawhid command-line tool
//!
//! Lists HID interfaces and exchanges packets with raw HID devices.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

mod config;
use config::CliConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.clone().unwrap_or_else(CliConfig::default_path);
    debug!("Loading config from {:?}", config_path);
    let config = CliConfig::load(&config_path)?;

    let target = commands::Target::resolve(&config, &cli.target);
    let hid = commands::connect(&config, cli.mock)?;
    debug!("Using {} backend", hid.platform_name());

    match cli.command {
        Commands::List { json } => commands::utility::list(&hid, json)?,
        Commands::Open { max } => commands::packet::open(&hid, &target, max)?,
        Commands::Recv { size, count } => commands::packet::recv(&hid, &target, size, count)?,
        Commands::Send { payload, size } => {
            commands::packet::send(&hid, &target, &payload, size)?
        }
        Commands::Echo { size, rounds } => commands::packet::echo(&hid, &target, size, rounds)?,
    }

    Ok(())
}
