use std::sync::Arc;

use locker_core::config::Config;
use locker_heartbeat::{HeartbeatTracker, Recovery};
use locker_queue::CommandQueue;
use locker_state::StateManager;
use locker_store::StateDb;

/// Shared handles for every handler. The Gateway is the sole owner of the
/// State Store, State Manager, Command Queue and Heartbeat Tracker — Kiosk
/// and Panel only ever reach these through HTTP via `locker-client`.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<StateDb>,
    pub state: Arc<StateManager>,
    pub queue: Arc<CommandQueue>,
    pub heartbeat: Arc<HeartbeatTracker>,
    pub recovery: Arc<Recovery>,
    pub config: Arc<Config>,
}

/// Unix seconds, UTC — the single clock every handler reads from.
pub fn now() -> locker_core::types::Timestamp {
    chrono::Utc::now().timestamp()
}

/// Unix milliseconds, UTC — for `executed_at`/`completed_at`, which need
/// finer resolution than the rest of the system's second-granularity clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
