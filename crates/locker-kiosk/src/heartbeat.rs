//! Periodic `POST /kiosks/{kiosk_id}/heartbeat` sender (§4.4). `hardware_ok`
//! reflects the Modbus health counters the Command Executor's `PulseEngine`
//! already tracks — a kiosk that can't pulse reliably should stop looking
//! alive to the Gateway even while its HTTP connection is fine.

use std::sync::Arc;
use std::time::Duration;

use locker_client::GatewayClient;
use locker_core::types::KioskId;
use locker_core::wire::HeartbeatRequest;
use locker_modbus::{HealthCounters, HealthStatus};
use tokio::task::JoinHandle;

pub fn spawn(
    kiosk_id: KioskId,
    client: Arc<GatewayClient>,
    health: Arc<HealthCounters>,
    interval: Duration,
    zone: Option<String>,
    channel_count: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let hardware_ok = !matches!(health.status(), HealthStatus::Error);
            let request = HeartbeatRequest {
                kiosk_id: kiosk_id.as_str().to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                zone: zone.clone(),
                channel_count,
                hardware_ok,
                last_command_at: None,
            };
            if let Err(e) = client.send_heartbeat(request).await {
                tracing::warn!(error = %e, "heartbeat send failed");
            }
        }
    })
}
