use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use locker_core::error::LockerError;
use locker_core::types::{Command, CommandPayload, CommandStatus, KioskId, LockerKey};
use locker_core::wire::{
    CommandStatusResponse, EnqueueRequest, EnqueueResponse, FailRequest, PulseResultRequest,
};
use locker_queue::EnqueueOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::{now, now_ms, AppState};

/// `POST /commands`. Every payload gets its State Manager transition applied
/// synchronously here, at enqueue time, before the row ever reaches the
/// queue — `staffOpen`/`blockByStaff`/`unblockByStaff` are what move a
/// locker into `Opening`/`Blocked` in the first place; the Kiosk Executor
/// only actuates hardware (or, for Block/Unblock, which have none, simply
/// claims and completes the row so every command type shares one uniform
/// lifecycle for the Panel's status polling).
pub async fn enqueue(
    State(state): State<AppState>,
    Json(mut req): Json<EnqueueRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.payload.command_type() != req.command_type {
        return Err(ApiError(LockerError::MalformedPayload(
            "command_type does not match payload".into(),
        )));
    }

    let kiosk_id = KioskId::new(req.kiosk_id.clone());
    let now = now();

    // An idempotent retry must short-circuit ahead of the pre-transition: the
    // first attempt already moved the locker, so re-running `staffOpen` et al.
    // against the same command_id would hit its own transition as a conflict.
    if let Some(existing) = state
        .queue
        .find_existing(req.command_id.as_deref(), &kiosk_id, &req.payload)
        .map_err(ApiError)?
    {
        let body = EnqueueResponse {
            command_id: existing.command_id,
            status: "duplicate".to_string(),
        };
        return Ok((StatusCode::CONFLICT, Json(body)));
    }

    apply_pre_transition(&state, &kiosk_id, &mut req.payload, now).await?;

    let (command, outcome) = state
        .queue
        .enqueue(kiosk_id, req.payload, req.command_id, now)
        .map_err(ApiError)?;

    let status = match outcome {
        EnqueueOutcome::Accepted => StatusCode::ACCEPTED,
        EnqueueOutcome::Duplicate => StatusCode::CONFLICT,
    };
    let body = EnqueueResponse {
        command_id: command.command_id,
        status: match outcome {
            EnqueueOutcome::Accepted => "accepted",
            EnqueueOutcome::Duplicate => "duplicate",
        }
        .to_string(),
    };
    Ok((status, Json(body)))
}

/// Applies the locker-state transition each command type implies before it
/// is ever queued. `OpenLocker`/`BulkOpen` move their target lockers to
/// `Opening` via `staffOpen` so the Executor has somewhere to pulse into;
/// `BulkOpen` narrows `locker_ids` down to only the lockers that actually
/// accepted the transition (e.g. a locker mid-transition elsewhere is
/// skipped rather than failing the whole batch — bulk guards are taken
/// locker-by-locker, never globally).
async fn apply_pre_transition(
    state: &AppState,
    kiosk_id: &KioskId,
    payload: &mut CommandPayload,
    now: locker_core::types::Timestamp,
) -> ApiResult<()> {
    match payload {
        CommandPayload::OpenLocker {
            locker_id,
            staff_user,
            override_vip,
            ..
        } => {
            let key = LockerKey::new(kiosk_id.clone(), *locker_id);
            state
                .state
                .staff_open(&key, staff_user, *override_vip, false, now)
                .await
                .map_err(ApiError)?;
        }
        CommandPayload::BulkOpen {
            locker_ids,
            staff_user,
            ..
        } => {
            let mut accepted = Vec::with_capacity(locker_ids.len());
            for locker_id in locker_ids.iter() {
                let key = LockerKey::new(kiosk_id.clone(), *locker_id);
                match state.state.staff_open(&key, staff_user, true, false, now).await {
                    Ok(_) => accepted.push(*locker_id),
                    Err(e) => {
                        tracing::debug!(locker = %key, error = %e, "skipping locker in bulk open");
                    }
                }
            }
            if accepted.is_empty() {
                return Err(ApiError(LockerError::Conflict(
                    "no lockers eligible for bulk open".into(),
                )));
            }
            *locker_ids = accepted;
        }
        CommandPayload::Block {
            locker_id,
            staff_user,
            reason,
        } => {
            let key = LockerKey::new(kiosk_id.clone(), *locker_id);
            state
                .state
                .block_by_staff(&key, staff_user, reason, now)
                .await
                .map_err(ApiError)?;
        }
        CommandPayload::Unblock {
            locker_id,
            staff_user,
            ..
        } => {
            let key = LockerKey::new(kiosk_id.clone(), *locker_id);
            state
                .state
                .unblock_by_staff(&key, staff_user, now)
                .await
                .map_err(ApiError)?;
        }
    }
    Ok(())
}

/// `GET /commands/{command_id}`.
pub async fn get_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> ApiResult<Json<CommandStatusResponse>> {
    let command = state.queue.status(&command_id).map_err(ApiError)?;
    Ok(Json(CommandStatusResponse::from(&command)))
}

/// `POST /commands/{command_id}/cancel`.
pub async fn cancel(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> ApiResult<Json<CommandStatusResponse>> {
    let command = state
        .queue
        .cancel(&command_id, now_ms())
        .map_err(ApiError)?;
    Ok(Json(CommandStatusResponse::from(&command)))
}

#[derive(Deserialize)]
pub struct ListCommandsQuery {
    limit: Option<u32>,
}

/// `GET /kiosks/{kiosk_id}/commands?limit=N`. Long-polls for up to
/// `LONG_POLL_DEADLINE_SECS` so a kiosk can watch for new pending work
/// without hammering the Gateway; never claims (see `claim_next`).
pub async fn list_for_kiosk(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
    Query(query): Query<ListCommandsQuery>,
) -> ApiResult<Json<Vec<Command>>> {
    let kiosk_id = KioskId::new(kiosk_id);
    let limit = query.limit.unwrap_or(50) as usize;
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(locker_core::constants::LONG_POLL_DEADLINE_SECS);

    loop {
        let mut commands = state
            .db
            .iter_pending_commands_for_kiosk(&kiosk_id)
            .map_err(ApiError)?;
        commands.retain(|c| c.status == CommandStatus::Pending);
        commands.truncate(limit);

        if !commands.is_empty() || tokio::time::Instant::now() >= deadline {
            return Ok(Json(commands));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// `POST /kiosks/{kiosk_id}/commands/claim` — runs `claimNext` server-side;
/// 204 when nothing is pending.
pub async fn claim(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kiosk_id = KioskId::new(kiosk_id);
    match state
        .queue
        .claim_next(&kiosk_id, now(), now_ms())
        .map_err(ApiError)?
    {
        Some(command) => Ok((StatusCode::OK, Json(Some(command)))),
        None => Ok((StatusCode::NO_CONTENT, Json(None))),
    }
}

/// `POST /kiosks/{kiosk_id}/commands/{command_id}/complete`.
pub async fn complete(
    State(state): State<AppState>,
    Path((_kiosk_id, command_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.queue.complete(&command_id, now_ms()).map_err(ApiError)?;
    Ok(StatusCode::OK)
}

/// `POST /kiosks/{kiosk_id}/commands/{command_id}/fail`.
pub async fn fail(
    State(state): State<AppState>,
    Path((_kiosk_id, command_id)): Path<(String, String)>,
    Json(req): Json<FailRequest>,
) -> ApiResult<StatusCode> {
    state
        .queue
        .fail(&command_id, &req.error, req.retryable, now(), now_ms())
        .map_err(ApiError)?;
    Ok(StatusCode::OK)
}

/// `POST /kiosks/{kiosk_id}/lockers/{locker_id}/pulse-result` (§4.5 step 6
/// resolved per-locker, ahead of the command-level `complete`/`fail`).
pub async fn pulse_result(
    State(state): State<AppState>,
    Path((kiosk_id, locker_id)): Path<(String, u32)>,
    Json(req): Json<PulseResultRequest>,
) -> ApiResult<StatusCode> {
    let key = LockerKey::new(KioskId::new(kiosk_id), locker_id);
    let now = now();

    if req.succeeded {
        state.state.pulse_succeeded(&key, now).await.map_err(ApiError)?;
    } else if retries_exhausted(&state, &req)? {
        // §4.2: `Opening → Error` only once retries are exhausted. A
        // retryable failure with attempts left leaves the locker in
        // `Opening` — the retried pulse lands on it next.
        let error = req.error.as_deref().unwrap_or("pulse_failed");
        state
            .state
            .pulse_failed(&key, error, now)
            .await
            .map_err(ApiError)?;
    }
    tracing::debug!(command_id = %req.command_id, locker = %key, succeeded = req.succeeded, "pulse result applied");
    Ok(StatusCode::OK)
}

/// Whether the command behind this pulse has no attempts left, i.e. the
/// Command Queue's own `fail` (driven by the same `retryable` flag) will
/// terminate it rather than retry.
fn retries_exhausted(state: &AppState, req: &PulseResultRequest) -> ApiResult<bool> {
    if !req.retryable {
        return Ok(true);
    }
    let command = state.queue.status(&req.command_id).map_err(ApiError)?;
    Ok(command.retry_count >= command.max_retries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::config::{Config, FeaturesConfig, HardwareConfig, LockersConfig, ModbusConfig, QueueConfig, SerialParity, ServicesConfig};
    use locker_core::types::{Locker, LockerNum, LockerStatus, OwnerType};
    use locker_heartbeat::{HeartbeatTracker, Recovery};
    use locker_queue::{CommandQueue, QueueLimits};
    use locker_state::StateManager;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(locker_store::StateDb::open(dir.path()).unwrap());
        let state = Arc::new(StateManager::new(Arc::clone(&db), 90));
        let queue = Arc::new(CommandQueue::new(
            Arc::clone(&db),
            QueueLimits {
                max_retries: 3,
                backoff_base_ms: 500,
                backoff_cap_ms: 8_000,
                per_kiosk_depth_limit: 100,
            },
        ));
        let heartbeat = Arc::new(HeartbeatTracker::new(Arc::clone(&db), 10));
        let recovery = Arc::new(Recovery::new(Arc::clone(&db), Arc::clone(&queue), Arc::clone(&state), 30));
        let config = Arc::new(Config {
            services: ServicesConfig::default(),
            modbus: ModbusConfig {
                port: "fake".into(),
                baudrate: 9600,
                parity: SerialParity::None,
                timeout_ms: 1000,
                pulse_duration_ms: 400,
                use_multiple_coils: true,
                verify_writes: false,
                max_retries: 2,
            },
            hardware: HardwareConfig::default(),
            lockers: LockersConfig {
                total_count: 10,
                auto_release_hours: 24,
                reservation_seconds: 90,
            },
            features: FeaturesConfig::default(),
            zones: Vec::new(),
            queue: QueueConfig::default(),
        });
        (AppState { db, state, queue, heartbeat, recovery, config }, dir)
    }

    fn free_locker(kiosk_id: &KioskId, locker_id: LockerNum) -> Locker {
        Locker {
            kiosk_id: kiosk_id.clone(),
            locker_id,
            status: LockerStatus::Free,
            owner_type: OwnerType::None,
            owner_key: None,
            reserved_at: None,
            owned_at: None,
            is_vip: false,
            display_name: None,
            version: 0,
            pending_intent: None,
        }
    }

    #[tokio::test]
    async fn open_locker_pre_transition_moves_a_free_locker_to_opening() {
        let (state, _dir) = test_state();
        let kiosk = KioskId::new("KIOSK-1");
        state.db.put_locker(&free_locker(&kiosk, 1)).unwrap();

        let mut payload = CommandPayload::OpenLocker {
            locker_id: 1,
            staff_user: "staff-1".into(),
            reason: "jam".into(),
            override_vip: false,
        };
        apply_pre_transition(&state, &kiosk, &mut payload, 1_000).await.unwrap();

        let locker = state
            .db
            .get_locker(&LockerKey::new(kiosk, 1))
            .unwrap()
            .unwrap();
        assert_eq!(locker.status, LockerStatus::Opening);
    }

    #[tokio::test]
    async fn bulk_open_narrows_locker_ids_to_the_ones_that_transitioned() {
        let (state, _dir) = test_state();
        let kiosk = KioskId::new("KIOSK-1");
        state.db.put_locker(&free_locker(&kiosk, 1)).unwrap();
        let mut blocked = free_locker(&kiosk, 2);
        blocked.status = LockerStatus::Blocked;
        state.db.put_locker(&blocked).unwrap();

        let mut payload = CommandPayload::BulkOpen {
            locker_ids: vec![1, 2],
            staff_user: "staff-1".into(),
            reason: "drill".into(),
            interval_ms: 1000,
            exclude_vip: true,
        };
        apply_pre_transition(&state, &kiosk, &mut payload, 1_000).await.unwrap();

        match payload {
            CommandPayload::BulkOpen { locker_ids, .. } => assert_eq!(locker_ids, vec![1]),
            _ => panic!("expected BulkOpen"),
        }
    }

    #[tokio::test]
    async fn bulk_open_with_no_eligible_lockers_fails_the_enqueue() {
        let (state, _dir) = test_state();
        let kiosk = KioskId::new("KIOSK-1");
        let mut blocked = free_locker(&kiosk, 1);
        blocked.status = LockerStatus::Blocked;
        state.db.put_locker(&blocked).unwrap();

        let mut payload = CommandPayload::BulkOpen {
            locker_ids: vec![1],
            staff_user: "staff-1".into(),
            reason: "drill".into(),
            interval_ms: 1000,
            exclude_vip: true,
        };
        let err = apply_pre_transition(&state, &kiosk, &mut payload, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err.0, LockerError::Conflict(_)));
    }
}
