use axum::extract::{Path, State};
use axum::Json;

use locker_core::types::{KioskId, Locker};
use locker_core::wire::{HeartbeatRequest, KioskSummary};
use locker_heartbeat::HeartbeatInput;

use crate::error::ApiResult;
use crate::state::{now, AppState};

/// `POST /kiosks/{kiosk_id}/heartbeat` (§4.4). Also provisions any locker
/// `1..=channel_count` not already known — lockers are "created by
/// provisioning when a kiosk first announces its channel count" (§3).
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<()> {
    let kiosk_id = KioskId::new(kiosk_id);
    let now = now();

    let input = HeartbeatInput {
        kiosk_id: kiosk_id.clone(),
        version: req.version,
        zone: req.zone,
        channel_count: req.channel_count,
        hardware_ok: req.hardware_ok,
        last_command_at: req.last_command_at,
    };
    state.heartbeat.record(input, now)?;

    for locker_id in 1..=req.channel_count {
        state.state.provision_if_absent(&kiosk_id, locker_id)?;
    }
    Ok(())
}

/// `GET /kiosks` — list with current status classification.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<KioskSummary>>> {
    let now = now();
    let summaries = state
        .heartbeat
        .list(now)?
        .into_iter()
        .map(|(hb, status)| KioskSummary {
            kiosk_id: hb.kiosk_id.as_str().to_string(),
            status,
            last_seen: hb.last_seen,
            hardware_ok: hb.hardware_ok,
            channel_count: hb.channel_count,
        })
        .collect();
    Ok(Json(summaries))
}

/// `GET /kiosks/{kiosk_id}/lockers` — the Panel's source for locker rows
/// (VIP status among them) when resolving a bulk-open's `exclude_vip`.
pub async fn list_lockers(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
) -> ApiResult<Json<Vec<Locker>>> {
    let lockers = state.state.list_for_kiosk(&KioskId::new(kiosk_id))?;
    Ok(Json(lockers))
}
