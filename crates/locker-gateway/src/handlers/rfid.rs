use axum::extract::{Path, State};
use axum::Json;

use locker_core::error::LockerError;
use locker_core::types::{KioskId, LockerKey, LockerNum};
use locker_core::wire::{CoilTarget, RfidResultRequest, RfidScanRequest, RfidScanResponse};
use locker_intake::{dispatch, Action, OwnedLocker, OwnershipLookup};

use crate::error::{ApiError, ApiResult};
use crate::state::{now, AppState};

/// Adapts the State Manager to `locker-intake`'s dispatch trait — the only
/// place that trait is implemented for real, since only the Gateway process
/// holds a `StateManager`.
struct StateManagerLookup<'a>(&'a locker_state::StateManager);

impl OwnershipLookup for StateManagerLookup<'_> {
    fn find_owned_locker(&self, kiosk_id: &KioskId, owner_key: &str) -> Option<OwnedLocker> {
        self.0
            .list_for_kiosk(kiosk_id)
            .ok()?
            .into_iter()
            .find(|l| l.owner_key.as_deref() == Some(owner_key))
            .map(|l| OwnedLocker {
                locker_id: l.locker_id,
                status: l.status,
            })
    }
}

/// `POST /kiosks/{kiosk_id}/rfid/scan` (§4.7). The Kiosk has already
/// debounced and normalized the uid/device hash before calling this; the
/// Gateway resolves which State Manager transition applies and, on success,
/// tells the Kiosk which coil to pulse.
pub async fn scan(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
    Json(req): Json<RfidScanRequest>,
) -> ApiResult<Json<RfidScanResponse>> {
    let kiosk_id = KioskId::new(kiosk_id);
    let now = now();
    let owner_key = req.uid_or_device_hash;

    let lookup = StateManagerLookup(&state.state);
    let action = dispatch(&lookup, &kiosk_id, &owner_key);

    let outcome = match action {
        Action::AssignRfid => state
            .state
            .assign_rfid(&kiosk_id, &owner_key, now)
            .await
            .map(|l| l.locker_id),
        Action::ConfirmOwnership { locker_id } => {
            let key = LockerKey::new(kiosk_id.clone(), locker_id);
            state
                .state
                .confirm_ownership(&key, &owner_key, now)
                .await
                .map(|l| l.locker_id)
        }
        Action::PresentRfid { locker_id } => {
            let key = LockerKey::new(kiosk_id.clone(), locker_id);
            state
                .state
                .present_rfid(&key, &owner_key, now)
                .await
                .map(|l| l.locker_id)
        }
    };

    match outcome {
        Ok(locker_id) => Ok(Json(RfidScanResponse {
            action: "pulse".to_string(),
            coil: Some(coil_for(locker_id)),
            locker_id: Some(locker_id),
            reason: "ok".to_string(),
        })),
        Err(e) => Ok(Json(reject(e))),
    }
}

fn coil_for(locker_id: LockerNum) -> CoilTarget {
    let (card_address, channel) = locker_core::config::Config::card_and_channel(locker_id);
    CoilTarget {
        card_address,
        channel,
    }
}

/// Scan failures are surfaced to the kiosk UI, not as HTTP errors — a
/// rejected scan is an expected outcome of the flow, not a fault.
fn reject(error: LockerError) -> RfidScanResponse {
    let reason = match &error {
        LockerError::AlreadyOwns => "already_owns",
        LockerError::NoLockersAvailable => "no_lockers_available",
        LockerError::OwnershipMismatch => "ownership_mismatch",
        LockerError::Conflict(_) => "conflict",
        _ => "error",
    };
    RfidScanResponse {
        action: "reject".to_string(),
        coil: None,
        locker_id: None,
        reason: reason.to_string(),
    }
}

/// `POST /kiosks/{kiosk_id}/rfid/result` — the Kiosk reports whether its
/// pulse succeeded, resolving the `Opening` locker just like
/// `pulse-result` does for staff commands.
pub async fn result(
    State(state): State<AppState>,
    Path(kiosk_id): Path<String>,
    Json(req): Json<RfidResultRequest>,
) -> ApiResult<()> {
    let key = LockerKey::new(KioskId::new(kiosk_id), req.locker_id);
    let now = now();

    if req.succeeded {
        state.state.pulse_succeeded(&key, now).await?;
    } else {
        state
            .state
            .pulse_failed(&key, "rfid_pulse_failed", now)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coil_for_matches_the_locker_to_card_mapping() {
        let coil = coil_for(17);
        assert_eq!(coil.card_address, 2);
        assert_eq!(coil.channel, 1);
    }

    #[test]
    fn reject_maps_known_errors_to_their_own_reason_and_falls_back_to_error() {
        assert_eq!(reject(LockerError::AlreadyOwns).reason, "already_owns");
        assert_eq!(
            reject(LockerError::NoLockersAvailable).reason,
            "no_lockers_available"
        );
        assert_eq!(
            reject(LockerError::OwnershipMismatch).reason,
            "ownership_mismatch"
        );
        assert_eq!(reject(LockerError::Conflict("x".into())).reason, "conflict");
        assert_eq!(reject(LockerError::CommandNotFound("x".into())).reason, "error");
    }

    #[test]
    fn reject_always_reports_pulse_action_as_reject_with_no_coil() {
        let response = reject(LockerError::AlreadyOwns);
        assert_eq!(response.action, "reject");
        assert!(response.coil.is_none());
        assert!(response.locker_id.is_none());
    }
}
