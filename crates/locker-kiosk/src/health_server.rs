//! Minimal `GET /healthz` on `services.kiosk_port`, mirroring the Gateway's
//! and Panel's HTTP surfaces — useful for local diagnostics even though the
//! kiosk's real work (command execution, RFID intake) runs off this port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use locker_modbus::{HealthCounters, HealthStatus};
use serde_json::json;

async fn healthz(State(health): State<Arc<HealthCounters>>) -> Json<serde_json::Value> {
    let status = match health.status() {
        HealthStatus::Ok => "ok",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Error => "error",
    };
    Json(json!({
        "status": status,
        "total_commands": health.total_commands(),
    }))
}

pub async fn serve(listen: SocketAddr, health: Arc<HealthCounters>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .with_state(health);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, "kiosk health endpoint ready");
    axum::serve(listener, app).await?;
    Ok(())
}
