//! Koji build host daemon (kojid)
//!
//! A reference implementation of the hub's host-facing protocol: polls
//! for assigned work, heartbeats, opens and closes tasks, and reports
//! refusals. Real build execution is a pluggable `TaskRunner`.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

mod client;
mod config;
mod poll;
mod runner;

use client::HubClient;
use config::ConfigManager;
use poll::Poller;
use runner::NoopTaskRunner;

/// Command-line arguments for the build host daemon.
#[derive(Parser, Debug)]
#[command(name = "kojid")]
#[command(about = "Koji build host daemon", long_about = None)]
struct CliArgs {
    /// Path to the host configuration file (host.toml), or a directory containing it.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the hub URL from the config file.
    #[arg(long = "hub-url", value_name = "URL")]
    hub_url: Option<String>,

    /// Override the poll interval, in seconds.
    #[arg(long = "poll-interval", value_name = "SECONDS")]
    poll_interval: Option<u64>,
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to register signal handlers: {e}");
                error!("falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to wait for Ctrl+C: {e}");
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to receive Ctrl+C signal: {e}");
        } else {
            info!("received Ctrl+C");
        }
    }
}

async fn run_poll_loop(
    mut poller: Poller,
    poll_interval: std::time::Duration,
    shutdown_timeout: std::time::Duration,
) -> Result<()> {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);

    tokio::select! {
        _ = async {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                match poller.tick().await {
                    Ok(report) => {
                        if report.opened > 0 || report.closed > 0 || report.refused > 0 {
                            info!(
                                opened = report.opened,
                                closed = report.closed,
                                refused = report.refused,
                                "poll tick"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "poll tick failed"),
                }
            }
        } => {}
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    }

    // Drain: give any in-flight task reports a chance to land.
    let _ = tokio::time::timeout(shutdown_timeout, shutdown_rx.recv()).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "kojid.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kojid=info,koji_common=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!(version = DAEMON_VERSION, "koji build host daemon starting up");
    info!(config_file = %cli_args.config_file.display(), "loading configuration");

    let mut manager = match ConfigManager::new(cli_args.config_file) {
        Ok(manager) => manager,
        Err(e) => {
            error!("failed to load host configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Some(hub_url) = cli_args.hub_url {
        let mut config = manager.config().clone();
        config.hub_url = hub_url;
        manager.host_config = Some(config);
        info!("hub URL overridden via command line");
    }
    if let Some(poll_interval) = cli_args.poll_interval {
        let mut config = manager.config().clone();
        config.poll_interval_seconds = poll_interval;
        manager.host_config = Some(config);
        info!("poll interval overridden via command line");
    }

    let host_config = manager.config().clone();

    let client = HubClient::new(
        host_config.hub_url.clone(),
        host_config.api_key.clone(),
        host_config.name.clone(),
        std::time::Duration::from_secs(host_config.http_client_timeout_seconds),
    )
    .context("failed to build hub client")?;

    let poller = Poller::new(client, Box::new(NoopTaskRunner), host_config.clone());

    run_poll_loop(
        poller,
        std::time::Duration::from_secs(host_config.poll_interval_seconds),
        std::time::Duration::from_secs(host_config.graceful_shutdown_timeout_seconds),
    )
    .await?;

    info!("kojid shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_manager_loads_from_cli_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
name = "builder1"
hub_url = "http://localhost:8080"
api_key = "secret"
arches = "x86_64"
channels = [1]
capacity = 4.0
"#
        )
        .unwrap();

        let manager = ConfigManager::new(temp_file.path().to_path_buf());
        assert!(manager.is_ok());
    }
}
