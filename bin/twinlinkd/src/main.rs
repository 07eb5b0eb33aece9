//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "binary"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Binary entrypoint for the TwinLink daemon."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use twinlink_common::init_tracing;
use twinlink_core::{AppConfig, AssetConnectionManager};
use twinlink_opcua::{OpcUaConnectionFactory, OpcUaSimulationConfig, ServerRegistry, ADAPTER_NAME};

#[derive(Debug, Parser)]
#[command(author, version, about = "TwinLink asset connectivity daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the connectivity daemon")]
    Run,
    #[command(about = "Validate the configuration and exit")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/twinlink.toml"));
    candidates.push(PathBuf::from("/etc/twinlink/twinlink.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            // Structural validation already ran during loading.
            println!("configuration ok ({})", loaded.source.display());
            Ok(())
        }
        Commands::Run => {
            init_tracing("twinlinkd", &loaded.config.logging)?;
            info!(config_path = %loaded.source.display(), "configuration loaded");
            run_daemon(loaded.config).await
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = ServerRegistry::new();
    if let Some(section) = config.adapters.get(ADAPTER_NAME) {
        let simulation: OpcUaSimulationConfig = section
            .clone()
            .try_into()
            .context("invalid opcua adapter section")?;
        simulation.apply(&registry);
    }

    let context = Arc::new(config.build_context());
    let manager = AssetConnectionManager::new(context, config.core.clone());
    manager.register_factory(Arc::new(OpcUaConnectionFactory::new(
        registry,
        config.core.clone(),
    )));
    for connection in &config.connections {
        manager.add(connection.clone())?;
    }

    manager.start().await;
    info!(
        connections = manager.connection_count(),
        "twinlink daemon running"
    );

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    manager.stop().await;
    Ok(())
}
