//! Shared HTTP wire shapes (§6) used by both `locker-gateway`/`locker-panel`
//! (serialize) and `locker-client` (deserialize), so the contract can't drift
//! between server and client.

use serde::{Deserialize, Serialize};

use crate::types::{Command, CommandPayload, CommandType, KioskStatus, LockerNum, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub kiosk_id: String,
    pub command_type: CommandType,
    pub payload: CommandPayload,
    #[serde(default)]
    pub command_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub command_id: String,
    pub status: String, // "accepted" | "duplicate"
}

/// Stable contract consumed by the Panel UI (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandStatusResponse {
    pub command_id: String,
    pub status: String,
    pub command_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locker_id: Option<LockerNum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locker_ids: Option<Vec<LockerNum>>,
    pub created_at: Timestamp,
    pub executed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl From<&Command> for CommandStatusResponse {
    fn from(c: &Command) -> Self {
        let ids = c.payload.locker_ids();
        let (locker_id, locker_ids) = match c.command_type() {
            CommandType::BulkOpen => (None, Some(ids)),
            _ => (ids.first().copied(), None),
        };
        Self {
            command_id: c.command_id.clone(),
            status: c.status.as_str().to_string(),
            command_type: c.command_type().as_str().to_string(),
            locker_id,
            locker_ids,
            created_at: c.created_at,
            executed_at: c.executed_at,
            completed_at: c.completed_at,
            duration_ms: c.duration_ms(),
            last_error: c.last_error.clone(),
            retry_count: c.retry_count,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailRequest {
    pub error: String,
    pub retryable: bool,
}

/// Reports the outcome of a single locker's pulse within a command (§4.5
/// step 6 resolves locker state per-locker; step 7 resolves the command as
/// a whole — `bulk_open` needs both, since each coil is independent
/// hardware and a partial failure should not block the lockers that did
/// open from leaving `Opening`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PulseResultRequest {
    pub command_id: String,
    pub succeeded: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Whether a failed pulse is worth retrying. Lets the Gateway tell a
    /// transient failure with attempts left apart from one that has
    /// exhausted its retries — only the latter should move the locker to
    /// `Error` (§4.2).
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub kiosk_id: String,
    pub version: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub channel_count: u32,
    pub hardware_ok: bool,
    #[serde(default)]
    pub last_command_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KioskSummary {
    pub kiosk_id: String,
    pub status: KioskStatus,
    pub last_seen: Timestamp,
    pub hardware_ok: bool,
    pub channel_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RfidScanRequest {
    pub uid_or_device_hash: String,
    pub owner_type: String, // "rfid" | "device"
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoilTarget {
    pub card_address: u8,
    pub channel: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RfidScanResponse {
    pub action: String, // "pulse" | "reject"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coil: Option<CoilTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locker_id: Option<LockerNum>,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RfidResultRequest {
    pub locker_id: LockerNum,
    pub uid_or_device_hash: String,
    pub succeeded: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenLockerRequest {
    pub staff_user: String,
    pub reason: String,
    #[serde(default)]
    pub override_vip: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkOpenRequest {
    pub kiosk_id: String,
    pub locker_ids: Vec<LockerNum>,
    pub staff_user: String,
    pub reason: String,
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub exclude_vip: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRequest {
    pub staff_user: String,
    pub reason: String,
}
