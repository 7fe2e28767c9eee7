//! `armsim` – runs a workspace of simulated two-link arms.
//!
//! 1. Loads the TOML configuration given with `--config` and applies
//!    `ARMSIM_*` environment overrides.
//! 2. Opens the transport chosen by `[protocol] transport`: the in-process
//!    bus, or a WebSocket bridge external clients connect to.  Builds the
//!    workspace on it, with arm descriptions written to SQLite (or memory
//!    when no path is set).
//! 3. Starts the TCP liveness probe.
//! 4. Ticks until **Ctrl-C**.  **SIGHUP** re-reads the configuration file
//!    and rebuilds every arm; a file that fails to load is logged and the
//!    running arms are kept.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use armsim_memory::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use armsim_middleware::{BridgeListener, MessageBus, PubSub, WebSocketBridge};
use armsim_probe::HealthServer;
use armsim_runtime::telemetry::init_tracing;
use armsim_runtime::{Transport, Workspace, WorkspaceConfig, WorkspaceSignal};
use armsim_types::ArmError;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Simulate a workspace of planar two-link robotic arms.
#[derive(Debug, Parser)]
#[command(name = "armsim", version, about)]
struct Args {
    /// Path of the workspace configuration file.
    #[arg(short, long, default_value = "config/armsim.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    // Before the runtime: the OTLP exporter is synchronous.
    let _guard = init_tracing("armsim");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "armsim exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ArmError> {
    let cfg = config::load_from(&args.config)?;
    info!(path = %args.config.display(), robots = cfg.robots.len(), "config loaded");

    let (bus, bridge) = open_bus(&cfg).await?;
    let bridge = bridge.map(BridgeListener::spawn);
    let store = open_store(&cfg)?;

    let health = HealthServer::bind(cfg.health_server.port).await?.spawn();

    let (signals_tx, signals_rx) = mpsc::channel(8);
    spawn_reload_listener(args.config.clone(), signals_tx.clone());
    spawn_ctrl_c_listener(signals_tx);

    let mut workspace = Workspace::build(&cfg, bus, Some(store))?;
    workspace.run(signals_rx).await;

    health.abort();
    if let Some(bridge) = bridge {
        bridge.abort();
    }
    info!("armsim stopped");
    Ok(())
}

/// The configured transport, plus the bridge listener still to be spawned
/// when it is `websocket`.
async fn open_bus(
    cfg: &WorkspaceConfig,
) -> Result<(Arc<dyn PubSub>, Option<BridgeListener>), ArmError> {
    match cfg.protocol.transport {
        Transport::Local => {
            info!("using the in-process bus; no external clients");
            Ok((Arc::new(MessageBus::default()), None))
        }
        Transport::Websocket => {
            let bridge = WebSocketBridge::default();
            let listener = bridge.listen(cfg.protocol.websocket.listen_addr()).await?;
            Ok((Arc::new(bridge), Some(listener)))
        }
    }
}

fn open_store(cfg: &WorkspaceConfig) -> Result<Arc<dyn SnapshotStore>, ArmError> {
    match &cfg.snapshot_store.path {
        Some(path) => {
            let store = SqliteSnapshotStore::open(path)
                .map_err(|e| ArmError::Store(format!("failed to open {path}: {e}")))?;
            info!(path = %path, "snapshot store opened");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemorySnapshotStore::new())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
fn spawn_reload_listener(path: PathBuf, signals: mpsc::Sender<WorkspaceSignal>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "failed to install SIGHUP handler; reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!(path = %path.display(), "SIGHUP received; reloading config");
            match config::load_from(&path) {
                Ok(cfg) => {
                    if signals.send(WorkspaceSignal::Reload(cfg)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "reload skipped; keeping current workspace"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_path: PathBuf, _signals: mpsc::Sender<WorkspaceSignal>) {
    warn!("reload on SIGHUP is only available on unix");
}

fn spawn_ctrl_c_listener(signals: mpsc::Sender<WorkspaceSignal>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received; shutting down");
                let _ = signals.send(WorkspaceSignal::Shutdown).await;
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl-C handler"),
        }
    });
}
