use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tftpd_rs::ServerConfig;
use tftpd_rs::config::DEFAULT_PORT;
use tftpd_rs::listener;

/// A TFTP (RFC 1350) server.
#[derive(Parser, Debug)]
#[command(name = "tftpd", version, about)]
struct Cli {
    /// Directory to serve files from and write uploads into.
    base_directory: PathBuf,

    /// UDP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let base_dir = std::fs::canonicalize(&cli.base_directory)
        .with_context(|| format!("base directory {:?} does not exist", cli.base_directory))?;
    if !base_dir.is_dir() {
        anyhow::bail!("{:?} is not a directory", base_dir);
    }

    let config = Arc::new(ServerConfig::new(base_dir, cli.port));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "failed to install signal handler");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    listener::run(config, shutdown_rx)
        .await
        .context("listener exited with an error")?;

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
