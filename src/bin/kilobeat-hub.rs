//! kilobeat-hub - relay hub for shared sessions
//!
//! Assigns participant ids, bootstraps joining peers with the current roster
//! and clock, and relays code, editor and pose updates between them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kilobeat::net::Hub;
use kilobeat::KilobeatConfig;

#[derive(Parser)]
#[command(name = "kilobeat-hub")]
#[command(about = "Relay hub for kilobeat sessions")]
#[command(version)]
struct Cli {
    /// Address to listen on (overrides `network.bind`)
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = KilobeatConfig::load_from(cli.config.as_deref()).context("loading config")?;
    let bind = cli.bind.unwrap_or(config.network.bind);

    let hub = Hub::bind(&bind).await.context("starting hub")?;
    info!(addr = %hub.local_addr(), "hub ready");

    shutdown_signal().await;
    hub.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
