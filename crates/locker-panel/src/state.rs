use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use locker_client::GatewayClient;

/// Shared handles for every handler. The Panel holds no locker state of its
/// own — it is a thin relay onto the Gateway API (§4.9) plus the one piece
/// of local bookkeeping the Gateway can't do for it: de-duplicating
/// near-simultaneous open clicks from the same staff UI.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<GatewayClient>,
    pub recent_opens: Arc<Mutex<HashMap<(String, u32), (i64, String)>>>,
}

/// Unix seconds, UTC — the single clock every handler reads from.
pub fn now() -> locker_core::types::Timestamp {
    chrono::Utc::now().timestamp()
}

/// Unix milliseconds — only for the in-memory open-dedup window, which needs
/// finer resolution than the store's second-granularity `Timestamp` (mirrors
/// `locker-intake`'s `Debouncer`, which takes the same `now_ms` shape).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
