use thiserror::Error;

/// Unified error taxonomy (§7). Each variant maps to one HTTP status via
/// [`LockerError::http_status`] and to one retryability classification via
/// [`LockerError::retryable`].
#[derive(Debug, Error)]
pub enum LockerError {
    // ── ValidationError — 400, not logged as incidents ──────────────────────
    #[error("unknown kiosk: {0}")]
    UnknownKiosk(String),

    #[error("locker {0} out of range for kiosk {1}")]
    LockerOutOfRange(u32, String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    // ── ConflictError — 409 ──────────────────────────────────────────────────
    #[error("duplicate command_id {0} with a differing payload")]
    DuplicateCommandPayloadMismatch(String),

    #[error("command {0} is already terminal and cannot be cancelled")]
    AlreadyTerminal(String),

    #[error("locker is blocked; staff override required")]
    BlockedWithoutOverride,

    #[error("concurrent transition conflict on {0}")]
    Conflict(String),

    #[error("duplicate open request for {0} within the debounce window")]
    DuplicateOpenRequest(String),

    // ── RFID flow errors — not retryable, surfaced to kiosk UI only ─────────
    #[error("uid does not match the locker's current owner")]
    OwnershipMismatch,

    #[error("this uid already owns a locker on this kiosk")]
    AlreadyOwns,

    #[error("no free lockers available on this kiosk")]
    NoLockersAvailable,

    // ── HardwareError — retryable ────────────────────────────────────────────
    #[error("modbus timeout on card {card_address} channel {channel}")]
    ModbusTimeout { card_address: u8, channel: u8 },

    #[error("modbus CRC mismatch")]
    ModbusCrcMismatch,

    #[error("modbus exception response: code {0:#04x}")]
    ModbusException(u8),

    #[error("unknown relay card address: {0}")]
    UnknownCard(u8),

    #[error("relay stuck open: OFF frame failed after retries")]
    RelayStuckOpen,

    // ── StaleLeaseError ──────────────────────────────────────────────────────
    #[error("stale lease recovered for command {0}")]
    StaleLease(String),

    // ── Backpressure ─────────────────────────────────────────────────────────
    #[error("queue depth limit exceeded for kiosk {0}")]
    QueueDepthExceeded(String),

    // ── Not found ─────────────────────────────────────────────────────────────
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("locker not found: {0}")]
    LockerNotFound(String),

    // ── Fatal / startup-only ─────────────────────────────────────────────────
    #[error("migration drift detected: migration {id} ({name}) hash changed since it was applied")]
    MigrationDrift { id: u32, name: String },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl LockerError {
    /// HTTP status this error surfaces as, per §7's propagation policy.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnknownKiosk(_)
            | Self::LockerOutOfRange(..)
            | Self::MalformedPayload(_) => 400,

            Self::DuplicateCommandPayloadMismatch(_)
            | Self::AlreadyTerminal(_)
            | Self::BlockedWithoutOverride
            | Self::Conflict(_)
            | Self::DuplicateOpenRequest(_) => 409,

            Self::OwnershipMismatch | Self::AlreadyOwns | Self::NoLockersAvailable => 422,

            Self::CommandNotFound(_) | Self::LockerNotFound(_) => 404,

            Self::QueueDepthExceeded(_) => 429,

            Self::ModbusTimeout { .. }
            | Self::ModbusCrcMismatch
            | Self::ModbusException(_)
            | Self::UnknownCard(_)
            | Self::RelayStuckOpen
            | Self::StaleLease(_)
            | Self::MigrationDrift { .. }
            | Self::Serialization(_)
            | Self::Storage(_)
            | Self::Other(_) => 500,
        }
    }

    /// Whether the executor should retry the command that produced this
    /// error, per §4.5's failure semantics and §7's taxonomy.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ModbusTimeout { .. }
                | Self::ModbusCrcMismatch
                | Self::ModbusException(_)
                | Self::StaleLease(_)
        )
    }

    /// Short, human-readable message with no stack trace, suitable for
    /// `Command.last_error` and a failed staff open's user-visible text.
    pub fn short_message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, LockerError>;
