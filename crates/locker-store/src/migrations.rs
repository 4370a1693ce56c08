//! Ordered, numbered migrations (§4.1). Each migration is identified by a
//! monotonic `id` and a stable `name`; its content hash is taken over
//! `id:name:description` so that renaming or resequencing a migration after
//! it has been applied is detected as drift rather than silently repaired
//! (§9 — "utilities that rewrite historical migration checksums are
//! explicitly rejected by this design").
//!
//! There is no legacy duplicate-numbered history to reconcile here (§9's
//! open question about `009/010/011` variants does not apply to a fresh
//! schema) — this list is the single canonical sequence.

pub struct Migration {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
}

impl Migration {
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", self.id, self.name, self.description).as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "init_lockers",
        description: "create lockers tree and locker-by-kiosk secondary index",
    },
    Migration {
        id: 2,
        name: "init_events",
        description: "create append-only events tree with monotonic id counter",
    },
    Migration {
        id: 3,
        name: "init_command_queue",
        description: "create command_queue tree and commands-by-kiosk ordering index",
    },
    Migration {
        id: 4,
        name: "init_kiosk_heartbeat",
        description: "create kiosk_heartbeat tree",
    },
    Migration {
        id: 5,
        name: "init_vip_contracts",
        description: "create vip_contracts tree and vip-contracts-by-locker index",
    },
];
