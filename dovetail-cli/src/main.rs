//! Dovetail CLI
//!
//! Runs the dovetail daemon: a bridge between classic DNS and
//! DNS-over-HTTPS, in either or both directions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dovetail_server::{Bridge, Config};

/// Dovetail - a DNS to DNS-over-HTTPS bridge
#[derive(Parser)]
#[command(name = "dovetail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dovetail.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "dovetail.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run => run(cli.config).await,
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;

    info!("Configuration loaded from {:?}", config_path);

    let (shutdown_tx, _) = broadcast::channel(4);
    let bridge = Bridge::bind(&config, &shutdown_tx)
        .await
        .context("Failed to start the bridge")?;

    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = bridge.run().await {
            error!("Bridge error: {}", e);
        }
    });

    wait_for_shutdown().await;

    info!("Shutting down...");
    let _ = shutdown_tx.send(());

    // Give the front-ends a bounded window to drain.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), bridge_handle).await;

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {output:?}"))?;

    println!("Sample configuration written to {output:?}");
    println!("\nEdit the configuration file and point it at your upstreams before running.");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
