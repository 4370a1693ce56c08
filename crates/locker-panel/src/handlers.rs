use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use locker_core::config::BulkIntervalConfig;
use locker_core::error::LockerError;
use locker_core::types::{CommandPayload, KioskId};
use locker_core::wire::{
    BlockRequest, BulkOpenRequest, CommandStatusResponse, EnqueueResponse, OpenLockerRequest,
};

use crate::error::{ApiError, ApiResult};
use crate::state::{now_ms, AppState};

fn status_for(outcome: &EnqueueResponse) -> StatusCode {
    if outcome.status == "duplicate" {
        StatusCode::CONFLICT
    } else {
        StatusCode::ACCEPTED
    }
}

type DedupKey = (String, u32);
type DedupTable = std::collections::HashMap<DedupKey, (i64, String)>;

/// Drops entries older than the dedup window, then looks up `key`. Split out
/// from `open` so the window logic can be exercised without a live Gateway.
fn prune_and_check_duplicate(recent: &mut DedupTable, key: &DedupKey, now_ms: i64) -> Option<String> {
    recent.retain(|_, (ts, _)| {
        now_ms - *ts < locker_core::constants::PANEL_DUPLICATE_OPEN_WINDOW_MS as i64
    });
    recent.get(key).map(|(_, command_id)| command_id.clone())
}

/// Drops any `locker_ids` entry present in `vip`, preserving input order.
fn exclude_vip(locker_ids: Vec<u32>, vip: &std::collections::HashSet<u32>) -> Vec<u32> {
    locker_ids.into_iter().filter(|id| !vip.contains(id)).collect()
}

/// `POST /api/lockers/{kiosk_id}/{locker_id}/open` (§4.9). A duplicate click
/// on the same `(kiosk_id, locker_id)` within `PANEL_DUPLICATE_OPEN_WINDOW_MS`
/// returns the first click's `command_id` with 409, without asking the
/// Gateway again — the Gateway's own idempotency is keyed on `command_id`,
/// which the Panel never sends here, so this window is the Panel's alone.
pub async fn open(
    State(state): State<AppState>,
    Path((kiosk_id, locker_id)): Path<(String, u32)>,
    Json(req): Json<OpenLockerRequest>,
) -> ApiResult<impl IntoResponse> {
    let now_ms = now_ms();
    let dedup_key = (kiosk_id.clone(), locker_id);

    if let Some(command_id) = {
        let mut recent = state.recent_opens.lock().unwrap();
        prune_and_check_duplicate(&mut recent, &dedup_key, now_ms)
    } {
        let body = EnqueueResponse {
            command_id,
            status: "duplicate".to_string(),
        };
        return Ok((StatusCode::CONFLICT, Json(body)));
    }

    let kiosk = KioskId::new(kiosk_id);
    let payload = CommandPayload::OpenLocker {
        locker_id,
        staff_user: req.staff_user,
        reason: req.reason,
        override_vip: req.override_vip,
    };
    let outcome = state
        .client
        .enqueue(&kiosk, payload, None)
        .await
        .map_err(ApiError)?;

    state
        .recent_opens
        .lock()
        .unwrap()
        .insert(dedup_key, (now_ms, outcome.command_id.clone()));

    let status = status_for(&outcome);
    Ok((status, Json(outcome)))
}

/// `POST /api/lockers/bulk-open`. VIP lockers are dropped from `locker_ids`
/// before enqueueing whenever `exclude_vip` is set (the default) — the
/// Gateway's own `staffOpen` pre-transition narrows the list further for any
/// locker that can't accept the transition, but VIP exclusion is a policy
/// decision the Panel makes up front, not a state-machine rule.
pub async fn bulk_open(
    State(state): State<AppState>,
    Json(req): Json<BulkOpenRequest>,
) -> ApiResult<impl IntoResponse> {
    let kiosk = KioskId::new(req.kiosk_id.clone());
    let interval_ms = BulkIntervalConfig::default().clamp(req.interval_ms);

    let locker_ids = if req.exclude_vip {
        let lockers = state.client.list_lockers(&kiosk).await.map_err(ApiError)?;
        let vip: std::collections::HashSet<_> = lockers
            .into_iter()
            .filter(|l| l.is_vip)
            .map(|l| l.locker_id)
            .collect();
        exclude_vip(req.locker_ids, &vip)
    } else {
        req.locker_ids
    };

    if locker_ids.is_empty() {
        return Err(ApiError(LockerError::MalformedPayload(
            "no lockers left to open after VIP exclusion".into(),
        )));
    }

    let payload = CommandPayload::BulkOpen {
        locker_ids,
        staff_user: req.staff_user,
        reason: req.reason,
        interval_ms,
        exclude_vip: req.exclude_vip,
    };
    let outcome = state
        .client
        .enqueue(&kiosk, payload, None)
        .await
        .map_err(ApiError)?;

    Ok((status_for(&outcome), Json(outcome)))
}

/// `POST /api/lockers/{kiosk_id}/{locker_id}/block`.
pub async fn block(
    State(state): State<AppState>,
    Path((kiosk_id, locker_id)): Path<(String, u32)>,
    Json(req): Json<BlockRequest>,
) -> ApiResult<impl IntoResponse> {
    let kiosk = KioskId::new(kiosk_id);
    let payload = CommandPayload::Block {
        locker_id,
        staff_user: req.staff_user,
        reason: req.reason,
    };
    let outcome = state
        .client
        .enqueue(&kiosk, payload, None)
        .await
        .map_err(ApiError)?;
    Ok((status_for(&outcome), Json(outcome)))
}

/// `POST /api/lockers/{kiosk_id}/{locker_id}/unblock`.
pub async fn unblock(
    State(state): State<AppState>,
    Path((kiosk_id, locker_id)): Path<(String, u32)>,
    Json(req): Json<BlockRequest>,
) -> ApiResult<impl IntoResponse> {
    let kiosk = KioskId::new(kiosk_id);
    let payload = CommandPayload::Unblock {
        locker_id,
        staff_user: req.staff_user,
        reason: req.reason,
    };
    let outcome = state
        .client
        .enqueue(&kiosk, payload, None)
        .await
        .map_err(ApiError)?;
    Ok((status_for(&outcome), Json(outcome)))
}

/// `GET /api/lockers/commands/{command_id}` — proxies `/commands/{id}` (§6).
pub async fn command_status(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> ApiResult<Json<CommandStatusResponse>> {
    let status = state
        .client
        .get_command(&command_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(status))
}
