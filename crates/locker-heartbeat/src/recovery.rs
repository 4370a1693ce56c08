use std::sync::Arc;

use locker_core::error::Result;
use locker_core::types::{CommandStatus, EventType, KioskId, LockerStatus, Timestamp};
use locker_queue::CommandQueue;
use locker_state::StateManager;
use locker_store::StateDb;

/// Stale-command recovery and restart handling (§4.4). Never reopens a
/// locker as part of recovery — `Opening` rows unreachable by recovery
/// become `Error` (§8 property 5).
pub struct Recovery {
    db: Arc<StateDb>,
    queue: Arc<CommandQueue>,
    state: Arc<StateManager>,
    stale_threshold_secs: i64,
}

impl Recovery {
    pub fn new(
        db: Arc<StateDb>,
        queue: Arc<CommandQueue>,
        state: Arc<StateManager>,
        stale_threshold_secs: u64,
    ) -> Self {
        Self {
            db,
            queue,
            state,
            stale_threshold_secs: stale_threshold_secs as i64,
        }
    }

    /// On kiosk startup: emit `restart`, then recover this kiosk's stale
    /// commands. The kiosk's own in-memory idempotency cache is cleared by
    /// the kiosk process itself (it isn't store-backed).
    pub async fn on_kiosk_startup(
        &self,
        kiosk_id: &KioskId,
        now: Timestamp,
        now_ms: i64,
    ) -> Result<usize> {
        self.db.append_event(
            kiosk_id.clone(),
            None,
            EventType::Restart,
            "system",
            serde_json::json!({}),
            now,
        )?;
        self.recover_stale_commands(Some(kiosk_id), now, now_ms)
    }

    /// On Gateway startup: global stale-command recovery, sweep `Reserved`
    /// lockers past their window, and force unverifiable `Opening` lockers
    /// to `Error`.
    pub async fn on_gateway_startup(&self, now: Timestamp, now_ms: i64) -> Result<()> {
        self.recover_stale_commands(None, now, now_ms)?;
        self.state.sweep_expired_reservations(now).await?;
        self.recover_unverifiable_opening_lockers(now).await?;
        Ok(())
    }

    /// Periodic sweep (≥ every 60s per §4.3) run by the Gateway's background
    /// loop. `executed_at` is millisecond-resolution, so staleness is judged
    /// against `now_ms`, not the second-granularity `now`.
    pub fn recover_stale_commands(
        &self,
        kiosk_id: Option<&KioskId>,
        now: Timestamp,
        now_ms: i64,
    ) -> Result<usize> {
        let mut recovered = 0;
        for command in self.db.iter_executing_commands()? {
            if let Some(k) = kiosk_id {
                if &command.kiosk_id != k {
                    continue;
                }
            }
            let executed_at = match command.executed_at {
                Some(t) => t,
                None => continue,
            };
            if now_ms - executed_at < self.stale_threshold_secs * 1000 {
                continue;
            }
            if command.status != CommandStatus::Executing {
                continue; // raced with a normal completion
            }
            self.queue
                .fail(&command.command_id, "stale_lease", true, now, now_ms)?;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn recover_unverifiable_opening_lockers(&self, now: Timestamp) -> Result<usize> {
        let mut recovered = 0;
        for locker in self.db.iter_all_lockers()? {
            if locker.status != LockerStatus::Opening {
                continue;
            }
            self.state
                .pulse_failed(&locker.key(), "unverifiable_after_restart", now)
                .await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::types::{CommandPayload, KioskId, Locker};
    use locker_queue::QueueLimits;

    fn setup() -> (Arc<StateDb>, Arc<CommandQueue>, Arc<StateManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        let queue = Arc::new(CommandQueue::new(db.clone(), QueueLimits::default()));
        let state = Arc::new(StateManager::new(db.clone(), 90));
        (db, queue, state, dir)
    }

    #[tokio::test]
    async fn stale_executing_command_returns_to_pending_with_incremented_retry() {
        let (db, queue, state, _dir) = setup();
        let kiosk_id = KioskId::new("KIOSK-1");

        let (cmd, _) = queue
            .enqueue(
                kiosk_id.clone(),
                CommandPayload::OpenLocker {
                    locker_id: 1,
                    staff_user: "alice".into(),
                    reason: "test".into(),
                    override_vip: false,
                },
                None,
                1000,
            )
            .unwrap();
        queue.claim_next(&kiosk_id, 1000, 1_000_000).unwrap();

        let recovery = Recovery::new(db.clone(), queue.clone(), state, 30);
        let recovered = recovery
            .recover_stale_commands(None, 1000 + 40, 1_000_000 + 40_000)
            .unwrap();
        assert_eq!(recovered, 1);

        let row = queue.status(&cmd.command_id).unwrap();
        assert_eq!(row.status, CommandStatus::Pending);
        assert_eq!(row.retry_count, 1);
    }

    #[tokio::test]
    async fn opening_locker_unreachable_by_recovery_becomes_error_not_free_or_owned() {
        let (db, queue, state, _dir) = setup();
        let kiosk_id = KioskId::new("KIOSK-1");
        db.put_locker(&Locker::free(kiosk_id.clone(), 1)).unwrap();
        state
            .staff_open(&locker_core::types::LockerKey::new(kiosk_id.clone(), 1), "alice", false, false, 1000)
            .await
            .unwrap();

        let recovery = Recovery::new(db.clone(), queue, state.clone(), 30);
        recovery.on_gateway_startup(2000, 2_000_000).await.unwrap();

        let locker = state
            .get(&locker_core::types::LockerKey::new(kiosk_id, 1))
            .unwrap();
        assert_eq!(locker.status, LockerStatus::Error);
    }
}
