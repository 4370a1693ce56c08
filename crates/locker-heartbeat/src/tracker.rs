use std::sync::Arc;

use locker_core::error::Result;
use locker_core::types::{KioskHeartbeat, KioskId, KioskStatus, Timestamp};
use locker_store::StateDb;

/// Incoming heartbeat payload (§4.4, §6).
pub struct HeartbeatInput {
    pub kiosk_id: KioskId,
    pub version: String,
    pub zone: Option<String>,
    pub channel_count: u32,
    pub hardware_ok: bool,
    pub last_command_at: Option<Timestamp>,
}

/// Tracks kiosk liveness (§4.4). A kiosk is `online` within `2x` its
/// heartbeat interval, `degraded` within `4x`, otherwise `offline`.
pub struct HeartbeatTracker {
    db: Arc<StateDb>,
    interval_secs: i64,
}

impl HeartbeatTracker {
    pub fn new(db: Arc<StateDb>, interval_secs: u64) -> Self {
        Self {
            db,
            interval_secs: interval_secs as i64,
        }
    }

    pub fn record(&self, input: HeartbeatInput, now: Timestamp) -> Result<KioskHeartbeat> {
        let hb = KioskHeartbeat {
            kiosk_id: input.kiosk_id,
            last_seen: now,
            version: input.version,
            zone: input.zone,
            status: KioskStatus::Online,
            hardware_ok: input.hardware_ok,
            channel_count: input.channel_count,
            last_command_at: input.last_command_at,
        };
        self.db.put_heartbeat(&hb)?;
        Ok(hb)
    }

    /// Liveness as of `now` — always recomputed from `last_seen`, since the
    /// `status` stored at heartbeat time goes stale the instant the kiosk
    /// stops posting.
    pub fn classify(&self, hb: &KioskHeartbeat, now: Timestamp) -> KioskStatus {
        let elapsed = now - hb.last_seen;
        if elapsed <= 2 * self.interval_secs {
            KioskStatus::Online
        } else if elapsed <= 4 * self.interval_secs {
            KioskStatus::Degraded
        } else {
            KioskStatus::Offline
        }
    }

    pub fn get(&self, kiosk_id: &KioskId, now: Timestamp) -> Result<Option<(KioskHeartbeat, KioskStatus)>> {
        Ok(self.db.get_heartbeat(kiosk_id)?.map(|hb| {
            let status = self.classify(&hb, now);
            (hb, status)
        }))
    }

    pub fn list(&self, now: Timestamp) -> Result<Vec<(KioskHeartbeat, KioskStatus)>> {
        Ok(self
            .db
            .iter_heartbeats()?
            .into_iter()
            .map(|hb| {
                let status = self.classify(&hb, now);
                (hb, status)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (Arc<StateDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        (db, dir)
    }

    fn input(kiosk_id: &str) -> HeartbeatInput {
        HeartbeatInput {
            kiosk_id: KioskId::new(kiosk_id),
            version: "1.0.0".into(),
            zone: None,
            channel_count: 32,
            hardware_ok: true,
            last_command_at: None,
        }
    }

    #[test]
    fn classifies_online_degraded_offline_by_elapsed_time() {
        let (db, _dir) = open_tmp();
        let tracker = HeartbeatTracker::new(db, 10);
        let hb = tracker.record(input("KIOSK-1"), 1000).unwrap();

        assert_eq!(tracker.classify(&hb, 1000 + 15), KioskStatus::Online);
        assert_eq!(tracker.classify(&hb, 1000 + 30), KioskStatus::Degraded);
        assert_eq!(tracker.classify(&hb, 1000 + 41), KioskStatus::Offline);
    }
}
