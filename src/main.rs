//! BDK speaker driver CLI
//!
//! Encodes and decodes protocol frames and runs transfers against the
//! simulated speaker.

use anyhow::Context;
use clap::Parser;

use bdk_driver::DriverConfig;

// CLI definitions
mod cli;
use cli::{Cli, Commands, ConfigCommands, FirmwareCommands, SimulateCommands};

// Command handlers
mod commands;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(DriverConfig::default_path);

    match cli.command {
        Commands::Encode(command) => commands::encode::run(command)?,
        Commands::Decode { hex } => commands::decode::run(&hex.join(" "))?,
        Commands::Presets { all } => commands::catalog::presets(all),
        Commands::Effects => commands::catalog::effects(),

        Commands::Simulate(sim) => {
            let config = DriverConfig::load(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            match sim {
                SimulateCommands::Ota { file, faults } => {
                    commands::simulate::ota(&config, &file, &faults)?
                }
                SimulateCommands::Sound { file, slot, faults } => {
                    commands::simulate::sound(&config, &file, slot, &faults)?
                }
            }
        }

        Commands::Firmware(FirmwareCommands::Validate { file }) => {
            commands::firmware::validate(&file)?
        }

        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(&config_path)?,
            ConfigCommands::Path => commands::config::path(&config_path),
            ConfigCommands::Init { force } => commands::config::init(&config_path, force)?,
        },
    }

    Ok(())
}
