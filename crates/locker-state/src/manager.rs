use std::sync::Arc;

use locker_core::error::{LockerError, Result};
use locker_core::types::{
    Event, EventType, KioskId, Locker, LockerKey, LockerNum, LockerStatus, OwnerType,
    PendingIntent, Timestamp,
};
use locker_store::StateDb;

use locker_core::GuardMap;

/// The canonical locker state machine (§4.2). Holds no state of its own
/// beyond the per-locker guard map — every row lives in `StateDb`.
pub struct StateManager {
    db: Arc<StateDb>,
    guards: GuardMap<LockerKey>,
    reservation_seconds: i64,
}

fn event(
    kiosk_id: &KioskId,
    locker_id: LockerNum,
    event_type: EventType,
    actor: &str,
    now: Timestamp,
    details: serde_json::Value,
) -> Event {
    Event {
        id: 0, // assigned by StateDb::commit_locker_transition
        timestamp: now,
        kiosk_id: kiosk_id.clone(),
        locker_id: Some(locker_id),
        event_type,
        actor: actor.to_string(),
        details,
    }
}

impl StateManager {
    pub fn new(db: Arc<StateDb>, reservation_seconds: u64) -> Self {
        Self {
            db,
            guards: GuardMap::new(),
            reservation_seconds: reservation_seconds as i64,
        }
    }

    fn load(&self, key: &LockerKey) -> Result<Locker> {
        self.db
            .get_locker(key)?
            .ok_or_else(|| LockerError::LockerNotFound(key.to_string()))
    }

    fn commit(&self, mut locker: Locker, event: Event) -> Result<Locker> {
        locker.version += 1;
        self.db.commit_locker_transition(&locker, &event)?;
        Ok(locker)
    }

    /// `assignRfid(uid)`: Free → Reserved. Picks the first `Free`, non-VIP
    /// locker on the kiosk automatically — `NoLockersAvailable` if none,
    /// `AlreadyOwns` if `uid` already holds one on this kiosk.
    pub async fn assign_rfid(
        &self,
        kiosk_id: &KioskId,
        uid: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let lockers = self.db.iter_lockers_for_kiosk(kiosk_id)?;

        if lockers.iter().any(|l| {
            l.owner_type == OwnerType::Rfid
                && l.owner_key.as_deref() == Some(uid)
                && matches!(
                    l.status,
                    LockerStatus::Owned | LockerStatus::Opening | LockerStatus::Reserved
                )
        }) {
            return Err(LockerError::AlreadyOwns);
        }

        let target = lockers
            .into_iter()
            .find(|l| l.status == LockerStatus::Free && !l.is_vip)
            .ok_or(LockerError::NoLockersAvailable)?;

        let _guard = self.guards.acquire(&target.key()).await;
        let mut locker = self.load(&target.key())?;
        if locker.status != LockerStatus::Free {
            return Err(LockerError::Conflict(locker.key().to_string()));
        }

        locker.status = LockerStatus::Reserved;
        locker.owner_type = OwnerType::Rfid;
        locker.owner_key = Some(uid.to_string());
        locker.reserved_at = Some(now);

        let ev = event(
            kiosk_id,
            locker.locker_id,
            EventType::RfidAssign,
            &format!("rfid:{uid}"),
            now,
            serde_json::json!({ "phase": "reserved" }),
        );
        self.commit(locker, ev)
    }

    /// `confirmOwnership(uid)`: Reserved → Opening, within the reservation
    /// window.
    pub async fn confirm_ownership(
        &self,
        key: &LockerKey,
        uid: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Reserved {
            return Err(LockerError::Conflict(key.to_string()));
        }
        if locker.owner_key.as_deref() != Some(uid) {
            return Err(LockerError::OwnershipMismatch);
        }
        let reserved_at = locker.reserved_at.unwrap_or(now);
        if now - reserved_at > self.reservation_seconds {
            return Err(LockerError::Conflict(format!(
                "{key}: reservation window elapsed"
            )));
        }

        locker.status = LockerStatus::Opening;
        locker.pending_intent = Some(PendingIntent::RfidAssign);

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::RfidAssign,
            &format!("rfid:{uid}"),
            now,
            serde_json::json!({ "phase": "opening" }),
        );
        self.commit(locker, ev)
    }

    /// `presentRfid(uid)`: Owned → Opening (release intent). Does not pulse;
    /// the caller pulses hardware and then reports back via
    /// `pulse_succeeded`/`pulse_failed`.
    pub async fn present_rfid(
        &self,
        key: &LockerKey,
        uid: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Owned {
            return Err(LockerError::Conflict(key.to_string()));
        }
        if locker.owner_key.as_deref() != Some(uid) {
            return Err(LockerError::OwnershipMismatch);
        }

        locker.status = LockerStatus::Opening;
        locker.pending_intent = Some(PendingIntent::RfidRelease);

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::RfidRelease,
            &format!("rfid:{uid}"),
            now,
            serde_json::json!({ "phase": "opening" }),
        );
        self.commit(locker, ev)
    }

    /// `staffOpen`: Free/Owned/Reserved → Opening (staff-initiated). VIP
    /// lockers require `override_ = true`. `release = true` additionally
    /// clears ownership once the pulse succeeds.
    pub async fn staff_open(
        &self,
        key: &LockerKey,
        staff_user: &str,
        override_: bool,
        release: bool,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if !matches!(
            locker.status,
            LockerStatus::Free | LockerStatus::Owned | LockerStatus::Reserved
        ) {
            return Err(LockerError::Conflict(key.to_string()));
        }
        if locker.is_vip && !override_ {
            return Err(LockerError::Conflict(format!(
                "{key}: vip locker requires override"
            )));
        }

        let revert_to = locker.status;
        locker.status = LockerStatus::Opening;
        locker.pending_intent = Some(if release {
            PendingIntent::StaffRelease
        } else {
            PendingIntent::StaffOpen { revert_to }
        });

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::StaffOpen,
            staff_user,
            now,
            serde_json::json!({ "release": release, "override": override_ }),
        );
        self.commit(locker, ev)
    }

    /// `blockByStaff`: any non-`Blocked` status → `Blocked`. Owner fields are
    /// cleared for non-VIP lockers; a VIP locker keeps its `owner_type = vip`
    /// / `owner_key` so `unblockByStaff` can restore ownership (see
    /// `invariant_owned_has_owner` and DESIGN.md's resolution of invariant
    /// (iv) — a VIP locker must never lose its VIP identity, block included).
    pub async fn block_by_staff(
        &self,
        key: &LockerKey,
        staff_user: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status == LockerStatus::Blocked {
            return Err(LockerError::Conflict(key.to_string()));
        }

        locker.status = LockerStatus::Blocked;
        locker.pending_intent = None;
        locker.reserved_at = None;
        if !locker.is_vip {
            locker.owner_type = OwnerType::None;
            locker.owner_key = None;
            locker.owned_at = None;
        }

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::Block,
            staff_user,
            now,
            serde_json::json!({ "reason": reason }),
        );
        self.commit(locker, ev)
    }

    /// `unblockByStaff`: `Blocked` → `Free`, or for a VIP locker → `Owned`
    /// (its contract ownership was preserved through the block).
    pub async fn unblock_by_staff(
        &self,
        key: &LockerKey,
        staff_user: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Blocked {
            return Err(LockerError::Conflict(key.to_string()));
        }

        if locker.is_vip {
            locker.status = LockerStatus::Owned;
            locker.owned_at = Some(now);
        } else {
            locker.status = LockerStatus::Free;
        }

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::Unblock,
            staff_user,
            now,
            serde_json::json!({}),
        );
        self.commit(locker, ev)
    }

    /// `clearError(staff)`: `Error` → `Free`.
    pub async fn clear_error(
        &self,
        key: &LockerKey,
        staff_user: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Error {
            return Err(LockerError::Conflict(key.to_string()));
        }

        locker.status = LockerStatus::Free;
        locker.owner_type = OwnerType::None;
        locker.owner_key = None;
        locker.reserved_at = None;
        locker.owned_at = None;
        locker.pending_intent = None;

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::Unblock,
            staff_user,
            now,
            serde_json::json!({ "cleared_error": true }),
        );
        self.commit(locker, ev)
    }

    /// Applies the outcome of a completed hardware pulse. `Opening` →
    /// terminal state determined by `pending_intent`.
    pub async fn pulse_succeeded(&self, key: &LockerKey, now: Timestamp) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Opening {
            return Err(LockerError::Conflict(key.to_string()));
        }
        let intent = locker
            .pending_intent
            .ok_or_else(|| LockerError::Conflict(format!("{key}: no pending intent")))?;

        let (event_type, actor) = match intent {
            PendingIntent::RfidAssign => {
                locker.status = LockerStatus::Owned;
                locker.owned_at = Some(now);
                locker.reserved_at = None;
                (
                    EventType::RfidAssign,
                    locker.owner_key.clone().unwrap_or_else(|| "system".into()),
                )
            }
            PendingIntent::RfidRelease => {
                let actor = locker.owner_key.clone().unwrap_or_else(|| "system".into());
                locker.status = LockerStatus::Free;
                locker.owner_type = OwnerType::None;
                locker.owner_key = None;
                locker.owned_at = None;
                locker.reserved_at = None;
                (EventType::RfidRelease, actor)
            }
            PendingIntent::StaffOpen { revert_to } => {
                locker.status = revert_to;
                (EventType::StaffOpen, "system".to_string())
            }
            PendingIntent::StaffRelease => {
                locker.status = LockerStatus::Free;
                locker.owner_type = OwnerType::None;
                locker.owner_key = None;
                locker.owned_at = None;
                locker.reserved_at = None;
                (EventType::StaffOpen, "system".to_string())
            }
        };
        locker.pending_intent = None;

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            event_type,
            &actor,
            now,
            serde_json::json!({ "outcome": "pulse_succeeded" }),
        );
        self.commit(locker, ev)
    }

    /// `pulseFailed` with retries exhausted: `Opening` → `Error`. Recovery
    /// safety (§8 property 5) — never falls back to `Free` or `Owned`.
    pub async fn pulse_failed(
        &self,
        key: &LockerKey,
        last_error: &str,
        now: Timestamp,
    ) -> Result<Locker> {
        let _guard = self.guards.acquire(key).await;
        let mut locker = self.load(key)?;

        if locker.status != LockerStatus::Opening {
            return Err(LockerError::Conflict(key.to_string()));
        }
        locker.status = LockerStatus::Error;
        locker.pending_intent = None;

        let ev = event(
            &key.kiosk_id,
            key.locker_id,
            EventType::HardwareError,
            "system",
            now,
            serde_json::json!({ "last_error": last_error }),
        );
        self.commit(locker, ev)
    }

    /// Sweeps `Reserved` lockers older than the reservation window back to
    /// `Free`, emitting `reservation_expired` (§4.2, §8 property 12).
    pub async fn sweep_expired_reservations(&self, now: Timestamp) -> Result<usize> {
        let mut swept = 0;
        for locker in self.db.iter_all_lockers()? {
            if locker.status != LockerStatus::Reserved {
                continue;
            }
            let reserved_at = match locker.reserved_at {
                Some(t) => t,
                None => continue,
            };
            if now - reserved_at <= self.reservation_seconds {
                continue;
            }

            let key = locker.key();
            let _guard = self.guards.acquire(&key).await;
            let mut locker = match self.load(&key) {
                Ok(l) => l,
                Err(_) => continue,
            };
            if locker.status != LockerStatus::Reserved {
                continue; // raced with a confirmOwnership between scan and guard
            }

            locker.status = LockerStatus::Free;
            locker.owner_type = OwnerType::None;
            locker.owner_key = None;
            locker.reserved_at = None;

            let ev = event(
                &key.kiosk_id,
                key.locker_id,
                EventType::ReservationExpired,
                "system",
                now,
                serde_json::json!({}),
            );
            self.commit(locker, ev)?;
            swept += 1;
        }
        Ok(swept)
    }

    pub fn get(&self, key: &LockerKey) -> Result<Locker> {
        self.load(key)
    }

    pub fn list_for_kiosk(&self, kiosk_id: &KioskId) -> Result<Vec<Locker>> {
        self.db.iter_lockers_for_kiosk(kiosk_id)
    }

    /// Decommission: only valid when `Free ∧ ¬is_vip` (§3 lifecycle).
    pub async fn decommission(&self, key: &LockerKey) -> Result<()> {
        let _guard = self.guards.acquire(key).await;
        let locker = self.load(key)?;
        if locker.status != LockerStatus::Free || locker.is_vip {
            return Err(LockerError::Conflict(format!(
                "{key}: decommission requires free, non-vip locker"
            )));
        }
        self.db.delete_locker(key)
    }

    /// Provisioning: first announcement of a channel by a kiosk (§3
    /// lifecycle — "created by provisioning when a kiosk first announces its
    /// channel count").
    pub fn provision_if_absent(&self, kiosk_id: &KioskId, locker_id: LockerNum) -> Result<Locker> {
        let key = LockerKey::new(kiosk_id.clone(), locker_id);
        if let Some(existing) = self.db.get_locker(&key)? {
            return Ok(existing);
        }
        let locker = Locker::free(kiosk_id.clone(), locker_id);
        self.db.put_locker(&locker)?;
        Ok(locker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::types::LockerStatus;

    fn open_tmp() -> (Arc<StateDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        (db, dir)
    }

    #[tokio::test]
    async fn rfid_assign_then_present_returns_to_free_with_expected_events() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        db.put_locker(&Locker::free(kiosk_id.clone(), 5)).unwrap();

        let mgr = StateManager::new(db.clone(), 90);

        let reserved = mgr.assign_rfid(&kiosk_id, "ABC123", 1000).await.unwrap();
        assert_eq!(reserved.status, LockerStatus::Reserved);

        let key = reserved.key();
        let opening = mgr.confirm_ownership(&key, "ABC123", 1005).await.unwrap();
        assert_eq!(opening.status, LockerStatus::Opening);

        let owned = mgr.pulse_succeeded(&key, 1010).await.unwrap();
        assert_eq!(owned.status, LockerStatus::Owned);
        assert_eq!(owned.owner_key.as_deref(), Some("ABC123"));

        let releasing = mgr.present_rfid(&key, "ABC123", 2000).await.unwrap();
        assert_eq!(releasing.status, LockerStatus::Opening);

        let freed = mgr.pulse_succeeded(&key, 2005).await.unwrap();
        assert_eq!(freed.status, LockerStatus::Free);
        assert!(freed.owner_key.is_none());

        let events = db.iter_events_for_locker(&key).unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::RfidAssign,
                EventType::RfidAssign,
                EventType::RfidRelease,
                EventType::RfidRelease,
            ]
        );
    }

    #[tokio::test]
    async fn assign_fails_when_uid_already_owns_a_locker_on_kiosk() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        db.put_locker(&Locker::free(kiosk_id.clone(), 1)).unwrap();
        db.put_locker(&Locker::free(kiosk_id.clone(), 2)).unwrap();

        let mgr = StateManager::new(db, 90);
        mgr.assign_rfid(&kiosk_id, "ABC123", 1000).await.unwrap();

        let err = mgr.assign_rfid(&kiosk_id, "ABC123", 1001).await.unwrap_err();
        assert!(matches!(err, LockerError::AlreadyOwns));
    }

    #[tokio::test]
    async fn assign_fails_when_no_free_lockers() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        let mgr = StateManager::new(db, 90);

        let err = mgr.assign_rfid(&kiosk_id, "ABC123", 1000).await.unwrap_err();
        assert!(matches!(err, LockerError::NoLockersAvailable));
    }

    #[tokio::test]
    async fn block_then_unblock_returns_non_vip_locker_to_free() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        let mut locker = Locker::free(kiosk_id.clone(), 1);
        locker.owner_type = OwnerType::Rfid;
        locker.owner_key = Some("ABC123".into());
        locker.status = LockerStatus::Owned;
        db.put_locker(&locker).unwrap();

        let mgr = StateManager::new(db, 90);
        let key = LockerKey::new(kiosk_id, 1);

        let blocked = mgr.block_by_staff(&key, "alice", "maintenance", 1000).await.unwrap();
        assert_eq!(blocked.status, LockerStatus::Blocked);
        assert!(blocked.owner_key.is_none());

        let unblocked = mgr.unblock_by_staff(&key, "alice", 1001).await.unwrap();
        assert_eq!(unblocked.status, LockerStatus::Free);
    }

    #[tokio::test]
    async fn vip_locker_cannot_reach_free_via_block_and_unblock() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        let locker = Locker::vip(kiosk_id.clone(), 9, "contract-1".into(), 0);
        db.put_locker(&locker).unwrap();

        let mgr = StateManager::new(db, 90);
        let key = LockerKey::new(kiosk_id, 9);

        let blocked = mgr.block_by_staff(&key, "alice", "audit", 1000).await.unwrap();
        assert_eq!(blocked.status, LockerStatus::Blocked);
        assert_eq!(blocked.owner_type, OwnerType::Vip);

        let unblocked = mgr.unblock_by_staff(&key, "alice", 1001).await.unwrap();
        assert_eq!(unblocked.status, LockerStatus::Owned);
        assert_ne!(unblocked.status, LockerStatus::Free);
        assert_eq!(unblocked.owner_type, OwnerType::Vip);
    }

    #[tokio::test]
    async fn sweep_expires_stale_reservations() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        db.put_locker(&Locker::free(kiosk_id.clone(), 1)).unwrap();

        let mgr = StateManager::new(db.clone(), 90);
        mgr.assign_rfid(&kiosk_id, "ABC123", 1000).await.unwrap();

        let swept = mgr.sweep_expired_reservations(1000 + 91).await.unwrap();
        assert_eq!(swept, 1);

        let key = LockerKey::new(kiosk_id, 1);
        let locker = mgr.get(&key).unwrap();
        assert_eq!(locker.status, LockerStatus::Free);

        let events = db.iter_events_for_locker(&key).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ReservationExpired));
    }

    #[tokio::test]
    async fn staff_open_on_vip_locker_requires_override() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        let locker = Locker::vip(kiosk_id.clone(), 3, "contract-1".into(), 0);
        db.put_locker(&locker).unwrap();

        let mgr = StateManager::new(db, 90);
        let key = LockerKey::new(kiosk_id, 3);

        let err = mgr
            .staff_open(&key, "alice", false, false, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, LockerError::Conflict(_)));

        let opening = mgr
            .staff_open(&key, "alice", true, false, 1000)
            .await
            .unwrap();
        assert_eq!(opening.status, LockerStatus::Opening);
    }

    #[tokio::test]
    async fn pulse_failed_on_opening_locker_transitions_to_error_never_free_or_owned() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        db.put_locker(&Locker::free(kiosk_id.clone(), 1)).unwrap();

        let mgr = StateManager::new(db, 90);
        let key = LockerKey::new(kiosk_id.clone(), 1);
        mgr.staff_open(&key, "alice", false, false, 1000).await.unwrap();

        let errored = mgr.pulse_failed(&key, "relay_stuck_open", 1001).await.unwrap();
        assert_eq!(errored.status, LockerStatus::Error);

        let cleared = mgr.clear_error(&key, "alice", 1002).await.unwrap();
        assert_eq!(cleared.status, LockerStatus::Free);
    }

    #[tokio::test]
    async fn provision_if_absent_creates_a_free_locker_once_and_is_idempotent() {
        let (db, _dir) = open_tmp();
        let kiosk_id = KioskId::new("KIOSK-1");
        let mgr = StateManager::new(db.clone(), 90);

        let provisioned = mgr.provision_if_absent(&kiosk_id, 4).unwrap();
        assert_eq!(provisioned.status, LockerStatus::Free);
        assert_eq!(provisioned.locker_id, 4);

        mgr.staff_open(&LockerKey::new(kiosk_id.clone(), 4), "alice", false, false, 1000)
            .await
            .unwrap();

        let reprovisioned = mgr.provision_if_absent(&kiosk_id, 4).unwrap();
        assert_eq!(reprovisioned.status, LockerStatus::Opening);
    }
}
