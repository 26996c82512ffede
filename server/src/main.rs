//! Koji build hub
//!
//! The hub exposes the host API surface, owns the task/host/refusal
//! database, and runs the scheduler loop on an interval. This is the
//! entry point: CLI parsing, logging setup, wiring, and graceful
//! shutdown.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const HUB_VERSION: &str = env!("CARGO_PKG_VERSION");
const WAL_CHECKPOINT_INTERVAL_SECS: u64 = 300;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod assign;
mod config;
mod database;
mod error;
mod pool;
mod refusals;
mod registry;
mod scheduler;

use config::ConfigManager;
use scheduler::Scheduler;

/// Command-line arguments for the hub.
#[derive(Parser, Debug)]
#[command(name = "kojihub")]
#[command(about = "Distributed build orchestrator hub", long_about = None)]
struct CliArgs {
    /// Path to the hub configuration file (hub.toml), or a directory containing it.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen address from the config file.
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the minimum seconds between scheduler ticks.
    #[arg(long = "run-interval", value_name = "SECONDS")]
    run_interval: Option<i64>,
}

pub struct Server {
    pub config_manager: Arc<Mutex<ConfigManager>>,
    listen_address: SocketAddr,
    database: Option<Arc<tokio::sync::Mutex<database::SchedulerDatabase>>>,
    scheduler: Arc<Scheduler>,
    scheduler_task_handle: Option<JoinHandle<()>>,
    wal_checkpoint_task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_manager = ConfigManager::new(config_path)?;
        let listen_address: SocketAddr = config_manager.config().listen_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "invalid listen address '{}': {}",
                config_manager.config().listen_address,
                e
            )
        })?;

        Ok(Self {
            config_manager: Arc::new(Mutex::new(config_manager)),
            listen_address,
            database: None,
            scheduler: Arc::new(Scheduler::new(format!("kojihub-{}", std::process::id()))),
            scheduler_task_handle: None,
            wal_checkpoint_task_handle: None,
            shutdown_tx: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(version = HUB_VERSION, "starting koji build hub");

        let hub_config = {
            let manager = self.config_manager.lock().await;
            manager.config().clone()
        };

        info!(
            listen_address = %self.listen_address,
            channels = hub_config.channels.len(),
            maxjobs = hub_config.scheduler.maxjobs,
            "hub configuration loaded"
        );

        let data_dir = PathBuf::from(&hub_config.database_path);
        let mut database = database::SchedulerDatabase::new(&data_dir, hub_config.database_busy_timeout_seconds)
            .context("failed to create database manager")?;
        database
            .initialize(&hub_config.channels)
            .context("failed to initialize database")?;

        let database_arc = Arc::new(tokio::sync::Mutex::new(database));
        self.database = Some(Arc::clone(&database_arc));

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // Periodic scheduler tick: drives assignment, reclamation, and
        // host eviction. `Scheduler::tick` itself gates on `run_interval`
        // via the advisory lock's last-run bookkeeping, so polling faster
        // than the interval is harmless.
        let scheduler_config = hub_config.scheduler.clone();
        let scheduler = Arc::clone(&self.scheduler);
        let db_for_scheduler = Arc::clone(&database_arc);
        let mut scheduler_shutdown_rx = shutdown_tx.subscribe();
        let poll_period = std::time::Duration::from_secs(scheduler_config.run_interval.max(1) as u64);
        let scheduler_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = koji_common::utils::current_timestamp();
                        let mut db = db_for_scheduler.lock().await;
                        match scheduler.tick(&mut db, &scheduler_config, now, false) {
                            Ok(report) if report.ran => {
                                info!(
                                    assignments = report.assignments_made,
                                    reclaimed = report.reclaimed_runs,
                                    evicted = report.evicted_hosts,
                                    "scheduler tick"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "scheduler tick failed"),
                        }
                    }
                    _ = scheduler_shutdown_rx.recv() => {
                        info!("scheduler task received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.scheduler_task_handle = Some(scheduler_task);

        let db_for_wal = Arc::clone(&database_arc);
        let mut wal_shutdown_rx = shutdown_tx.subscribe();
        let wal_checkpoint_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(WAL_CHECKPOINT_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut db = db_for_wal.lock().await;
                        match db.checkpoint_wal() {
                            Ok(frames) => info!(frames, "WAL checkpoint completed"),
                            Err(e) => warn!(error = %e, "WAL checkpoint failed"),
                        }
                    }
                    _ = wal_shutdown_rx.recv() => {
                        info!("WAL checkpoint task received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.wal_checkpoint_task_handle = Some(wal_checkpoint_task);

        let app_state = api::AppState::new(hub_config, Arc::clone(&database_arc), Arc::clone(&self.scheduler));
        let app = api::create_router(app_state);

        info!("starting HTTP server on {}", self.listen_address);
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "failed to bind TCP listener to {}. Check if the port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

        Ok(())
    }

    pub async fn shutdown(&mut self) {
        info!("shutting down koji build hub");

        let shutdown_timeout_secs = {
            let manager = self.config_manager.lock().await;
            manager.config().graceful_shutdown_timeout_seconds
        };

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("failed to send shutdown signal: {e}");
            }
        }

        for (name, handle) in [
            ("scheduler", self.scheduler_task_handle.take()),
            ("WAL checkpoint", self.wal_checkpoint_task_handle.take()),
        ] {
            if let Some(handle) = handle {
                match tokio::time::timeout(
                    std::time::Duration::from_secs(shutdown_timeout_secs),
                    handle,
                )
                .await
                {
                    Ok(Ok(())) => info!("{name} task completed successfully"),
                    Ok(Err(e)) => warn!("{name} task panicked: {e}"),
                    Err(_) => warn!("{name} task shutdown timeout reached, aborting"),
                }
            }
        }

        if let Some(database_arc) = &self.database {
            info!("closing database connection");
            let mut db = database_arc.lock().await;
            db.close();
        }

        info!("hub shutdown complete");
    }
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

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "kojihub.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kojihub=info,koji_common=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("koji build hub starting up");
    info!(config_file = %cli_args.config_file.display(), "loading configuration");

    let mut server = match Server::new(cli_args.config_file) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to initialize hub: {e}");
            std::process::exit(1);
        }
    };

    if let Some(listen_address) = cli_args.listen_address {
        match listen_address.parse() {
            Ok(addr) => {
                info!("listen address overridden via command line");
                server.listen_address = addr;
            }
            Err(e) => {
                error!("invalid --listen-address override '{listen_address}': {e}");
                std::process::exit(1);
            }
        }
    }
    if let Some(run_interval) = cli_args.run_interval {
        let mut manager = server.config_manager.lock().await;
        let mut config = manager.config().clone();
        config.scheduler.run_interval = run_interval;
        if let Err(e) = config.validate() {
            error!("invalid --run-interval override: {e}");
            std::process::exit(1);
        }
        manager.hub_config = Some(config);
        info!("run interval overridden via command line");
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("hub error: {e}");
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received, initiating graceful shutdown");
        }
    }

    server.shutdown().await;
    info!("hub shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn server_new_succeeds_with_valid_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
listen_address = "127.0.0.1:8787"
api_key = "test-api-key"
database_path = "/tmp/koji-hub-test-data"
"#
        )
        .unwrap();

        let result = Server::new(temp_file.path().to_path_buf());
        assert!(result.is_ok());
    }
}
