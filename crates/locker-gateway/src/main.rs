//! locker-gateway — the Gateway coordinator binary.
//!
//! Startup sequence:
//!   1. Open the state database
//!   2. Run startup recovery (stale commands, expired reservations,
//!      unverifiable `Opening` lockers)
//!   3. Spawn the periodic recovery sweep
//!   4. Serve the HTTP API Kiosks and the Panel talk to over `locker-client`

mod error;
mod handlers;
mod router;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use locker_core::config::Config;
use locker_core::constants::RECOVERY_SWEEP_INTERVAL_SECS;
use locker_heartbeat::{HeartbeatTracker, Recovery};
use locker_queue::{CommandQueue, QueueLimits};
use locker_state::StateManager;
use locker_store::StateDb;

use crate::state::{now, now_ms, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "locker-gateway",
    version,
    about = "Locker facility Gateway — single source of truth for locker state, the command queue and kiosk liveness"
)]
struct Args {
    /// Path to the facility configuration JSON.
    #[arg(long, env = "LOCKER_CONFIG", default_value = "config/facility.json")]
    config: PathBuf,

    /// Directory for the persistent state database.
    #[arg(long, env = "LOCKER_DATA_DIR", default_value = "./data/gateway")]
    data_dir: PathBuf,

    /// Override the listen address instead of `services.gateway_port` from config.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,locker=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("locker-gateway starting");

    let config = Arc::new(
        Config::load(&args.config)
            .with_context(|| format!("loading config from {}", args.config.display()))?,
    );

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;
    let db = Arc::new(StateDb::open(&args.data_dir).context("opening state database")?);

    let state = Arc::new(StateManager::new(
        Arc::clone(&db),
        config.lockers.reservation_seconds,
    ));
    let queue = Arc::new(CommandQueue::new(
        Arc::clone(&db),
        QueueLimits {
            max_retries: config.queue.max_retries,
            backoff_base_ms: config.queue.backoff_ms,
            backoff_cap_ms: locker_core::constants::DEFAULT_BACKOFF_CAP_MS,
            per_kiosk_depth_limit: config.queue.per_kiosk_depth_limit,
        },
    ));
    let heartbeat = Arc::new(HeartbeatTracker::new(
        Arc::clone(&db),
        locker_core::constants::DEFAULT_HEARTBEAT_INTERVAL_SECS,
    ));
    let recovery = Arc::new(Recovery::new(
        Arc::clone(&db),
        Arc::clone(&queue),
        Arc::clone(&state),
        config.queue.stale_threshold_ms / 1000,
    ));

    info!("running startup recovery");
    recovery
        .on_gateway_startup(now(), now_ms())
        .await
        .context("startup recovery")?;

    let sweep_recovery = Arc::clone(&recovery);
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(RECOVERY_SWEEP_INTERVAL_SECS));
        ticker.tick().await; // skip the immediate first tick, startup already swept
        loop {
            ticker.tick().await;
            let now = now();
            let now_ms = now_ms();
            if let Err(e) = sweep_recovery.recover_stale_commands(None, now, now_ms) {
                warn!(error = %e, "periodic stale-command sweep failed");
            }
            if let Err(e) = sweep_state.sweep_expired_reservations(now).await {
                warn!(error = %e, "periodic reservation sweep failed");
            }
        }
    });

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.services.gateway_port)));

    let app_state = AppState {
        db,
        state,
        queue,
        heartbeat,
        recovery,
        config,
    };
    let app = router::build_router(app_state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "gateway ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving gateway")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
