//! locker-panel — the staff Admin Panel's server-side relay (§4.9).
//!
//! A thin proxy: every state-modifying route enqueues a command against the
//! Gateway over `locker-client` and returns its `EnqueueResponse`/
//! `CommandStatusResponse` verbatim. The Panel holds no locker state itself.

mod error;
mod handlers;
mod router;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use locker_client::GatewayClient;
use locker_core::config::Config;

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "locker-panel",
    version,
    about = "Locker facility Panel — staff-facing relay onto the Gateway API"
)]
struct Args {
    /// Path to the facility configuration JSON (read for the service ports).
    #[arg(long, env = "LOCKER_CONFIG", default_value = "config/facility.json")]
    config: PathBuf,

    /// Override the Gateway base URL instead of deriving it from config.
    #[arg(long, env = "LOCKER_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Override the listen address instead of `services.panel_port`.
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
    info!("locker-panel starting");

    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let gateway_url = args
        .gateway_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.services.gateway_port));
    let client = Arc::new(GatewayClient::new(gateway_url.clone()));
    info!(%gateway_url, "relaying to gateway");

    let app_state = AppState {
        client,
        recent_opens: Arc::new(Mutex::new(HashMap::new())),
    };
    let app = router::build_router(app_state);

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.services.panel_port)));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "panel ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving panel")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
