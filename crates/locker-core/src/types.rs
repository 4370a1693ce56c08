//! Shared wire/storage types for the locker facility control system.
//!
//! Core domain types: `Locker`, `Event`, `Command`, `KioskHeartbeat`,
//! `VipContract`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp, seconds, UTC.
pub type Timestamp = i64;

/// Room-level kiosk identifier (e.g. `"KIOSK-1"`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KioskId(pub String);

impl KioskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KioskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for KioskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KioskId({})", self.0)
    }
}

/// Locker number within a kiosk, 1-based.
pub type LockerNum = u32;

/// Composite locker identity `(kiosk_id, id)`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct LockerKey {
    pub kiosk_id: KioskId,
    pub locker_id: LockerNum,
}

impl LockerKey {
    pub fn new(kiosk_id: KioskId, locker_id: LockerNum) -> Self {
        Self { kiosk_id, locker_id }
    }

    /// Storage key bytes: `kiosk_id` UTF-8, NUL separator, big-endian locker id.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = self.kiosk_id.0.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&self.locker_id.to_be_bytes());
        key
    }
}

impl fmt::Display for LockerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kiosk_id, self.locker_id)
    }
}

/// Locker lifecycle state (§4.2).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum LockerStatus {
    Free,
    Reserved,
    Owned,
    Opening,
    Blocked,
    Error,
}

impl LockerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Reserved => "reserved",
            Self::Owned => "owned",
            Self::Opening => "opening",
            Self::Blocked => "blocked",
            Self::Error => "error",
        }
    }
}

/// Owner kind for a locker (§3 invariant ii/iii).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    None,
    Rfid,
    Device,
    Vip,
}

/// What an `Opening` locker is mid-way through, so `pulseSucceeded` /
/// `pulseFailed` know which terminal state to apply (§4.2's table has two
/// distinct `Opening` rows — assign-intent and release-intent — plus staff
/// opens that must restore the locker's prior status rather than assign or
/// release ownership).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PendingIntent {
    RfidAssign,
    RfidRelease,
    StaffOpen { revert_to: LockerStatus },
    StaffRelease,
}

/// A locker row.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Locker {
    pub kiosk_id: KioskId,
    pub locker_id: LockerNum,
    pub status: LockerStatus,
    pub owner_type: OwnerType,
    pub owner_key: Option<String>,
    pub reserved_at: Option<Timestamp>,
    pub owned_at: Option<Timestamp>,
    pub is_vip: bool,
    pub display_name: Option<String>,
    pub version: u64,
    /// Transient — only meaningful while `status = Opening`.
    pub pending_intent: Option<PendingIntent>,
}

impl Locker {
    pub fn key(&self) -> LockerKey {
        LockerKey::new(self.kiosk_id.clone(), self.locker_id)
    }

    /// A freshly provisioned, non-VIP locker.
    pub fn free(kiosk_id: KioskId, locker_id: LockerNum) -> Self {
        Self {
            kiosk_id,
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

    /// A provisioned VIP locker, already owned by its contract holder.
    pub fn vip(kiosk_id: KioskId, locker_id: LockerNum, owner_key: String, now: Timestamp) -> Self {
        Self {
            kiosk_id,
            locker_id,
            status: LockerStatus::Owned,
            owner_type: OwnerType::Vip,
            owner_key: Some(owner_key),
            reserved_at: None,
            owned_at: Some(now),
            is_vip: true,
            display_name: None,
            version: 0,
            pending_intent: None,
        }
    }

    /// Invariant (i): Free implies no owner and no timestamps.
    pub fn invariant_free_has_no_owner(&self) -> bool {
        if self.status != LockerStatus::Free {
            return true;
        }
        self.owner_type == OwnerType::None
            && self.owner_key.is_none()
            && self.reserved_at.is_none()
            && self.owned_at.is_none()
    }

    /// Invariant (ii): Owned/Opening/Reserved implies an owner is set.
    pub fn invariant_owned_has_owner(&self) -> bool {
        match self.status {
            LockerStatus::Owned | LockerStatus::Opening | LockerStatus::Reserved => {
                self.owner_type != OwnerType::None && self.owner_key.is_some()
            }
            _ => true,
        }
    }
}

/// Append-only audit log entry (§3 Event).
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Event {
    pub id: u64,
    pub timestamp: Timestamp,
    pub kiosk_id: KioskId,
    pub locker_id: Option<LockerNum>,
    pub event_type: EventType,
    pub actor: String,
    pub details: serde_json::Value,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RfidAssign,
    RfidRelease,
    StaffOpen,
    BulkOpen,
    Block,
    Unblock,
    VipAssign,
    VipRelease,
    Restart,
    CommandFailed,
    HardwareError,
    ReservationExpired,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RfidAssign => "rfid_assign",
            Self::RfidRelease => "rfid_release",
            Self::StaffOpen => "staff_open",
            Self::BulkOpen => "bulk_open",
            Self::Block => "block",
            Self::Unblock => "unblock",
            Self::VipAssign => "vip_assign",
            Self::VipRelease => "vip_release",
            Self::Restart => "restart",
            Self::CommandFailed => "command_failed",
            Self::HardwareError => "hardware_error",
            Self::ReservationExpired => "reservation_expired",
        }
    }
}

/// Command kind accepted at the queue (§3 Command).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    OpenLocker,
    BulkOpen,
    Block,
    Unblock,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenLocker => "open_locker",
            Self::BulkOpen => "bulk_open",
            Self::Block => "block",
            Self::Unblock => "unblock",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Command payload — one variant per `CommandType`.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CommandPayload {
    OpenLocker {
        locker_id: LockerNum,
        staff_user: String,
        reason: String,
        #[serde(default)]
        override_vip: bool,
    },
    BulkOpen {
        locker_ids: Vec<LockerNum>,
        staff_user: String,
        reason: String,
        interval_ms: u64,
        exclude_vip: bool,
    },
    Block {
        locker_id: LockerNum,
        staff_user: String,
        reason: String,
    },
    Unblock {
        locker_id: LockerNum,
        staff_user: String,
        reason: String,
    },
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::OpenLocker { .. } => CommandType::OpenLocker,
            Self::BulkOpen { .. } => CommandType::BulkOpen,
            Self::Block { .. } => CommandType::Block,
            Self::Unblock { .. } => CommandType::Unblock,
        }
    }

    pub fn staff_user(&self) -> &str {
        match self {
            Self::OpenLocker { staff_user, .. }
            | Self::BulkOpen { staff_user, .. }
            | Self::Block { staff_user, .. }
            | Self::Unblock { staff_user, .. } => staff_user,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::OpenLocker { reason, .. }
            | Self::BulkOpen { reason, .. }
            | Self::Block { reason, .. }
            | Self::Unblock { reason, .. } => reason,
        }
    }

    /// Locker ids this command touches, in caller order.
    pub fn locker_ids(&self) -> Vec<LockerNum> {
        match self {
            Self::OpenLocker { locker_id, .. }
            | Self::Block { locker_id, .. }
            | Self::Unblock { locker_id, .. } => vec![*locker_id],
            Self::BulkOpen { locker_ids, .. } => locker_ids.clone(),
        }
    }
}

/// A durable, idempotent command queue row (§3 Command).
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Command {
    pub command_id: String,
    pub kiosk_id: KioskId,
    pub payload: CommandPayload,
    pub status: CommandStatus,
    pub created_at: Timestamp,
    pub next_attempt_at: Timestamp,
    /// Millisecond-resolution, unlike the other timestamps on this row —
    /// see `duration_ms`.
    pub executed_at: Option<Timestamp>,
    /// Millisecond-resolution, unlike the other timestamps on this row —
    /// see `duration_ms`.
    pub completed_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        self.payload.command_type()
    }

    /// `duration_ms = completed_at − executed_at` when both are present.
    /// Both fields are millisecond-resolution Unix timestamps — unlike every
    /// other `Timestamp` on this row, which is whole seconds — so a
    /// sub-second pulse still reports a real, non-quantized duration.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.executed_at, self.completed_at) {
            (Some(e), Some(c)) => Some(c - e),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum KioskStatus {
    Online,
    Degraded,
    Offline,
}

/// Kiosk liveness row (§3 KioskHeartbeat).
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct KioskHeartbeat {
    pub kiosk_id: KioskId,
    pub last_seen: Timestamp,
    pub version: String,
    pub zone: Option<String>,
    pub status: KioskStatus,
    pub hardware_ok: bool,
    pub channel_count: u32,
    pub last_command_at: Option<Timestamp>,
}

/// VIP contract (§3 VipContract) — touched by the core only for its state
/// coupling with `Locker.is_vip` / `owner_type = Vip`.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct VipContract {
    pub id: String,
    pub kiosk_id: KioskId,
    pub locker_id: LockerNum,
    pub owner_key: String,
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    pub active: bool,
}
