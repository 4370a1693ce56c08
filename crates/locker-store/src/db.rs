use std::path::Path;

use locker_core::error::{LockerError, Result};
use locker_core::types::{
    Command, Event, EventType, KioskHeartbeat, KioskId, Locker, LockerKey, LockerNum, Timestamp,
    VipContract,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::migrations::MIGRATIONS;

/// Persistent state database backed by `sled` (§4.1).
///
/// Named trees:
///   lockers            — `(kiosk_id, locker_id)` bytes → bincode(Locker)
///   events             — be(u64 id)                    → bincode(Event)
///   events_by_locker   — locker key ++ be(id)           → be(id)           [index]
///   command_queue      — command_id utf8                → bincode(Command)
///   commands_by_kiosk  — kiosk_id ++ be(created_at) ++ command_id → command_id [index]
///   kiosk_heartbeat    — kiosk_id utf8                   → bincode(KioskHeartbeat)
///   vip_contracts      — contract id utf8                → bincode(VipContract)
///   vip_by_locker      — locker key ++ contract id       → contract id      [index]
///   meta               — utf8 key                        → raw bytes
///   schema_migrations  — be(u32 id)                       → bincode(AppliedMigration)
pub struct StateDb {
    db: sled::Db,
    lockers: sled::Tree,
    events: sled::Tree,
    events_by_locker: sled::Tree,
    command_queue: sled::Tree,
    commands_by_kiosk: sled::Tree,
    kiosk_heartbeat: sled::Tree,
    vip_contracts: sled::Tree,
    vip_by_locker: sled::Tree,
    meta: sled::Tree,
    schema_migrations: sled::Tree,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct AppliedMigration {
    name: String,
    content_hash: String,
}

fn storage_err(e: impl std::fmt::Display) -> LockerError {
    LockerError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> LockerError {
    LockerError::Serialization(e.to_string())
}

fn encode<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    bincode::serialize(v).map_err(ser_err)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(ser_err)
}

impl StateDb {
    /// Open or create the state database at `path`, applying migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(None) // we flush explicitly after every commit
            .open()
            .map_err(storage_err)?;

        let this = Self {
            lockers: db.open_tree("lockers").map_err(storage_err)?,
            events: db.open_tree("events").map_err(storage_err)?,
            events_by_locker: db.open_tree("events_by_locker").map_err(storage_err)?,
            command_queue: db.open_tree("command_queue").map_err(storage_err)?,
            commands_by_kiosk: db.open_tree("commands_by_kiosk").map_err(storage_err)?,
            kiosk_heartbeat: db.open_tree("kiosk_heartbeat").map_err(storage_err)?,
            vip_contracts: db.open_tree("vip_contracts").map_err(storage_err)?,
            vip_by_locker: db.open_tree("vip_by_locker").map_err(storage_err)?,
            meta: db.open_tree("meta").map_err(storage_err)?,
            schema_migrations: db.open_tree("schema_migrations").map_err(storage_err)?,
            db,
        };
        this.apply_migrations()?;
        Ok(this)
    }

    fn apply_migrations(&self) -> Result<()> {
        for m in MIGRATIONS {
            let key = m.id.to_be_bytes();
            let hash = m.content_hash();
            match self
                .schema_migrations
                .get(key)
                .map_err(storage_err)?
            {
                Some(existing) => {
                    let applied: AppliedMigration = decode(&existing)?;
                    if applied.content_hash != hash {
                        return Err(LockerError::MigrationDrift {
                            id: m.id,
                            name: m.name.to_string(),
                        });
                    }
                }
                None => {
                    let record = AppliedMigration {
                        name: m.name.to_string(),
                        content_hash: hash,
                    };
                    self.schema_migrations
                        .insert(key, encode(&record)?)
                        .map_err(storage_err)?;
                    tracing::info!(migration = m.name, id = m.id, "applied migration");
                }
            }
        }
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Flush all pending writes to disk. Callers must flush after every
    /// state-changing commit per §4.1's durability contract.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Lockers ──────────────────────────────────────────────────────────────

    pub fn get_locker(&self, key: &LockerKey) -> Result<Option<Locker>> {
        match self.lockers.get(key.storage_key()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_locker(&self, locker: &Locker) -> Result<()> {
        let bytes = encode(locker)?;
        self.lockers
            .insert(locker.key().storage_key(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_locker(&self, key: &LockerKey) -> Result<()> {
        self.lockers
            .remove(key.storage_key())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_lockers_for_kiosk(&self, kiosk_id: &KioskId) -> Result<Vec<Locker>> {
        let mut prefix = kiosk_id.as_str().as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.lockers.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        out.sort_by_key(|l: &Locker| l.locker_id);
        Ok(out)
    }

    pub fn iter_all_lockers(&self) -> Result<Vec<Locker>> {
        let mut out = Vec::new();
        for item in self.lockers.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Atomically write the locker row and its associated event. Used by the
    /// State Manager so every transition logs exactly one event in the same
    /// transaction (§4.2).
    pub fn commit_locker_transition(&self, locker: &Locker, event: &Event) -> Result<()> {
        use sled::Transactional;
        let locker_bytes = encode(locker)?;
        let locker_key = locker.key().storage_key();

        let event_id = self.next_event_id()?;
        let mut event = event.clone();
        event.id = event_id;
        let event_bytes = encode(&event)?;
        let event_key = event_id.to_be_bytes();

        let mut event_index_key = locker.key().storage_key();
        event_index_key.extend_from_slice(&event_key);

        (&self.lockers, &self.events, &self.events_by_locker)
            .transaction(|(lockers, events, events_by_locker)| {
                lockers.insert(locker_key.clone(), locker_bytes.clone())?;
                events.insert(&event_key, event_bytes.clone())?;
                events_by_locker.insert(event_index_key.clone(), &event_key)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))?;

        self.flush()
    }

    // ── Events ───────────────────────────────────────────────────────────────

    fn next_event_id(&self) -> Result<u64> {
        let counter = self
            .meta
            .update_and_fetch("next_event_id", |old| {
                let current = old
                    .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
                    .unwrap_or(0);
                Some((current + 1).to_be_bytes().to_vec())
            })
            .map_err(storage_err)?
            .expect("update_and_fetch always returns Some here");
        Ok(u64::from_be_bytes(counter.as_ref().try_into().unwrap()))
    }

    /// Append a system-level event not tied to a single locker transition
    /// (e.g. `restart`, `reservation_expired` produced outside a guarded
    /// transition context).
    pub fn append_event(
        &self,
        kiosk_id: KioskId,
        locker_id: Option<LockerNum>,
        event_type: EventType,
        actor: &str,
        details: serde_json::Value,
        timestamp: Timestamp,
    ) -> Result<Event> {
        let id = self.next_event_id()?;
        let event = Event {
            id,
            timestamp,
            kiosk_id: kiosk_id.clone(),
            locker_id,
            event_type,
            actor: actor.to_string(),
            details,
        };
        let bytes = encode(&event)?;
        self.events
            .insert(id.to_be_bytes(), bytes)
            .map_err(storage_err)?;
        if let Some(lid) = locker_id {
            let mut index_key = LockerKey::new(kiosk_id, lid).storage_key();
            index_key.extend_from_slice(&id.to_be_bytes());
            self.events_by_locker
                .insert(index_key, &id.to_be_bytes())
                .map_err(storage_err)?;
        }
        self.flush()?;
        Ok(event)
    }

    pub fn iter_events_for_locker(&self, key: &LockerKey) -> Result<Vec<Event>> {
        let prefix = key.storage_key();
        let mut out = Vec::new();
        for item in self.events_by_locker.scan_prefix(prefix) {
            let (_, id_bytes) = item.map_err(storage_err)?;
            if let Some(bytes) = self.events.get(&id_bytes).map_err(storage_err)? {
                out.push(decode(&bytes)?);
            }
        }
        out.sort_by_key(|e: &Event| e.id);
        Ok(out)
    }

    pub fn iter_recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        for item in self.events.iter().rev().take(limit) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub fn get_command(&self, command_id: &str) -> Result<Option<Command>> {
        match self
            .command_queue
            .get(command_id.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn kiosk_order_key(kiosk_id: &KioskId, created_at: Timestamp, command_id: &str) -> Vec<u8> {
        let mut key = kiosk_id.as_str().as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&(created_at as u64).to_be_bytes());
        key.push(0);
        key.extend_from_slice(command_id.as_bytes());
        key
    }

    /// Insert a brand-new command row. Returns `Err` via the caller's
    /// idempotency check (see `locker-queue`) before this is reached for
    /// existing `command_id`s — this method always inserts unconditionally.
    pub fn insert_command(&self, command: &Command) -> Result<()> {
        let bytes = encode(command)?;
        self.command_queue
            .insert(command.command_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        let order_key =
            Self::kiosk_order_key(&command.kiosk_id, command.created_at, &command.command_id);
        self.commands_by_kiosk
            .insert(order_key, command.command_id.as_bytes())
            .map_err(storage_err)?;
        self.flush()
    }

    /// Compare-and-swap a command row. Used for claim/complete/fail/cancel so
    /// concurrent callers never both win (§4.3, §8 property 2).
    pub fn cas_command(&self, old: &Command, new: &Command) -> Result<bool> {
        let old_bytes = encode(old)?;
        let new_bytes = encode(new)?;
        let result = self
            .command_queue
            .compare_and_swap(
                old.command_id.as_bytes(),
                Some(old_bytes),
                Some(new_bytes),
            )
            .map_err(storage_err)?;
        let won = result.is_ok();
        if won {
            self.flush()?;
        }
        Ok(won)
    }

    /// Oldest pending commands for `kiosk_id` whose `next_attempt_at <= now`,
    /// in creation order, for the executor to attempt claiming in turn.
    pub fn iter_pending_commands_for_kiosk(&self, kiosk_id: &KioskId) -> Result<Vec<Command>> {
        let mut prefix = kiosk_id.as_str().as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.commands_by_kiosk.scan_prefix(prefix) {
            let (_, command_id_bytes) = item.map_err(storage_err)?;
            let command_id = String::from_utf8_lossy(&command_id_bytes).to_string();
            if let Some(cmd) = self.get_command(&command_id)? {
                out.push(cmd);
            }
        }
        Ok(out)
    }

    /// All non-terminal commands across all kiosks — used by recovery's
    /// stale-lease sweep (§4.4).
    pub fn iter_executing_commands(&self) -> Result<Vec<Command>> {
        let mut out = Vec::new();
        for item in self.command_queue.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let cmd: Command = decode(&bytes)?;
            if matches!(cmd.status, locker_core::types::CommandStatus::Executing) {
                out.push(cmd);
            }
        }
        Ok(out)
    }

    pub fn count_open_commands_for_kiosk(&self, kiosk_id: &KioskId) -> Result<usize> {
        Ok(self
            .iter_pending_commands_for_kiosk(kiosk_id)?
            .into_iter()
            .filter(|c| !c.status.is_terminal())
            .count())
    }

    // ── Kiosk heartbeats ──────────────────────────────────────────────────────

    pub fn get_heartbeat(&self, kiosk_id: &KioskId) -> Result<Option<KioskHeartbeat>> {
        match self
            .kiosk_heartbeat
            .get(kiosk_id.as_str().as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_heartbeat(&self, hb: &KioskHeartbeat) -> Result<()> {
        let bytes = encode(hb)?;
        self.kiosk_heartbeat
            .insert(hb.kiosk_id.as_str().as_bytes(), bytes)
            .map_err(storage_err)?;
        self.flush()
    }

    pub fn iter_heartbeats(&self) -> Result<Vec<KioskHeartbeat>> {
        let mut out = Vec::new();
        for item in self.kiosk_heartbeat.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── VIP contracts ────────────────────────────────────────────────────────

    pub fn get_vip_contract(&self, id: &str) -> Result<Option<VipContract>> {
        match self.vip_contracts.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_vip_contract(&self, contract: &VipContract) -> Result<()> {
        let bytes = encode(contract)?;
        self.vip_contracts
            .insert(contract.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        let mut index_key = LockerKey::new(contract.kiosk_id.clone(), contract.locker_id).storage_key();
        index_key.extend_from_slice(contract.id.as_bytes());
        self.vip_by_locker
            .insert(index_key, contract.id.as_bytes())
            .map_err(storage_err)?;
        self.flush()
    }

    pub fn iter_vip_contracts_for_locker(&self, key: &LockerKey) -> Result<Vec<VipContract>> {
        let prefix = key.storage_key();
        let mut out = Vec::new();
        for item in self.vip_by_locker.scan_prefix(prefix) {
            let (_, id_bytes) = item.map_err(storage_err)?;
            let id = String::from_utf8_lossy(&id_bytes).to_string();
            if let Some(c) = self.get_vip_contract(&id)? {
                out.push(c);
            }
        }
        Ok(out)
    }

    // ── Misc ─────────────────────────────────────────────────────────────────

    pub fn count_lockers(&self) -> u64 {
        self.lockers.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::types::{LockerStatus, OwnerType};

    fn open_tmp() -> (StateDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open(dir.path()).unwrap();
        (db, dir)
    }

    #[test]
    fn migrations_apply_idempotently_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _db = StateDb::open(dir.path()).unwrap();
        }
        // Reopening must not raise MigrationDrift since content is unchanged.
        let _db2 = StateDb::open(dir.path()).unwrap();
    }

    #[test]
    fn locker_round_trip() {
        let (db, _dir) = open_tmp();
        let locker = Locker::free(KioskId::new("KIOSK-1"), 7);
        db.put_locker(&locker).unwrap();
        let fetched = db.get_locker(&locker.key()).unwrap().unwrap();
        assert_eq!(fetched.status, LockerStatus::Free);
        assert_eq!(fetched.owner_type, OwnerType::None);
    }

    #[test]
    fn iter_lockers_for_kiosk_is_scoped_and_sorted() {
        let (db, _dir) = open_tmp();
        db.put_locker(&Locker::free(KioskId::new("KIOSK-1"), 3)).unwrap();
        db.put_locker(&Locker::free(KioskId::new("KIOSK-1"), 1)).unwrap();
        db.put_locker(&Locker::free(KioskId::new("KIOSK-10"), 1)).unwrap();

        let lockers = db.iter_lockers_for_kiosk(&KioskId::new("KIOSK-1")).unwrap();
        assert_eq!(lockers.len(), 2);
        assert_eq!(lockers[0].locker_id, 1);
        assert_eq!(lockers[1].locker_id, 3);
    }

    #[test]
    fn commit_locker_transition_writes_locker_and_event_atomically() {
        let (db, _dir) = open_tmp();
        let locker = Locker::free(KioskId::new("KIOSK-1"), 5);
        let event = Event {
            id: 0,
            timestamp: 1000,
            kiosk_id: locker.kiosk_id.clone(),
            locker_id: Some(locker.locker_id),
            event_type: EventType::RfidAssign,
            actor: "rfid:ABC123".into(),
            details: serde_json::json!({}),
        };
        db.commit_locker_transition(&locker, &event).unwrap();

        let fetched = db.get_locker(&locker.key()).unwrap().unwrap();
        assert_eq!(fetched.status, LockerStatus::Free);

        let events = db.iter_events_for_locker(&locker.key()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RfidAssign);
    }

    #[test]
    fn cas_command_prevents_double_claim() {
        let (db, _dir) = open_tmp();
        let cmd = Command {
            command_id: "c1".into(),
            kiosk_id: KioskId::new("KIOSK-1"),
            payload: locker_core::types::CommandPayload::OpenLocker {
                locker_id: 1,
                staff_user: "alice".into(),
                reason: "test".into(),
                override_vip: false,
            },
            status: locker_core::types::CommandStatus::Pending,
            created_at: 0,
            next_attempt_at: 0,
            executed_at: None,
            completed_at: None,
            last_error: None,
            retry_count: 0,
            max_retries: 3,
        };
        db.insert_command(&cmd).unwrap();

        let mut claimed1 = cmd.clone();
        claimed1.status = locker_core::types::CommandStatus::Executing;
        claimed1.executed_at = Some(1);

        let mut claimed2 = cmd.clone();
        claimed2.status = locker_core::types::CommandStatus::Executing;
        claimed2.executed_at = Some(2);

        let won1 = db.cas_command(&cmd, &claimed1).unwrap();
        let won2 = db.cas_command(&cmd, &claimed2).unwrap();

        assert!(won1);
        assert!(!won2, "second claimant must lose the CAS race");
    }
}
