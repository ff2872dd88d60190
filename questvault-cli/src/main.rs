//! questvault: operator CLI for the QuestVault rules engine
//!
//! Opens the SQLite store named in the config file, wires the optional
//! narrator into the gamification service, and runs one command.

mod commands;
mod config;
mod password;
mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use questvault::GamificationService;
use questvault_store::SqliteStore;
use tracing::info;

use commands::Commands;
use config::VaultConfig;

#[derive(Parser)]
#[command(name = "questvault")]
#[command(about = "Gamified life tracking: quests, achievements and dimension XP")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "QUESTVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config file)
    #[arg(short, long, env = "QUESTVAULT_DB")]
    database: Option<PathBuf>,

    /// Never call the external narrator
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("questvault=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    if let Commands::InitConfig { force } = cli.command {
        return commands::init_config(&config_path, force);
    }

    let mut config = VaultConfig::load(&config_path)?;
    if let Some(database) = cli.database {
        config.storage.database_path = database;
    }
    if cli.offline {
        config.narrator.enabled = false;
    }

    info!("Config file: {}", config_path.display());
    info!("Database: {}", config.storage.database_path.display());

    let store = Arc::new(SqliteStore::open(&config.storage.database_path)?);
    let mut service = GamificationService::new(store.clone(), config.service.clone());
    if let Some(narrator) = config.narrator.backend()? {
        service = service.with_narrator(narrator);
    }

    let output = commands::execute(&service, &store, cli.command).await?;
    println!("{}", output);
    Ok(())
}
