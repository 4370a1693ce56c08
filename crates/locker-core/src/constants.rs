//! Default values referenced across §4 components. All are overridable via
//! [`crate::config::Config`].

/// §4.2 reservation window.
pub const DEFAULT_RESERVATION_SECONDS: u64 = 90;

/// §4.3 backoff: base, cap, jitter.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 8_000;
pub const BACKOFF_JITTER_FRACTION: f64 = 0.2;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// §4.3/§4.4 stale lease / recovery sweep interval.
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 30_000;
pub const RECOVERY_SWEEP_INTERVAL_SECS: u64 = 60;

/// §4.3 bulk interval clamp.
pub const DEFAULT_BULK_MIN_INTERVAL_MS: u64 = 300;
pub const DEFAULT_BULK_MAX_INTERVAL_MS: u64 = 5_000;

/// §5 backpressure.
pub const DEFAULT_PER_KIOSK_DEPTH_LIMIT: usize = 100;

/// §4.4 heartbeat classification.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// §4.6 pulse duration clamp.
pub const DEFAULT_PULSE_DURATION_MS: u64 = 400;
pub const MIN_PULSE_DURATION_MS: u64 = 100;
pub const MAX_PULSE_DURATION_MS: u64 = 2_000;

/// §4.6 frame retries and inter-frame gap.
pub const FRAME_RETRIES: u32 = 2;
pub const FRAME_RETRY_SPACING_MS: u64 = 100;
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1_000;

/// §4.6 Modbus RTU function codes.
pub const FC_READ_COILS: u8 = 0x01;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// §4.6 channels per relay card.
pub const CHANNELS_PER_CARD: u32 = 16;

/// §4.6 health counter window.
pub const HEALTH_WINDOW: usize = 100;
pub const HEALTH_ERROR_RATE_THRESHOLD: f64 = 0.05;
pub const HEALTH_CONSECUTIVE_FAILURE_THRESHOLD: u32 = 5;

/// §4.7 RFID debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

/// §5 lease / timeout defaults.
pub const DEFAULT_COMMAND_LEASE_MS: u64 = 30_000;
pub const DEFAULT_MODBUS_FRAME_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_STAFF_HTTP_TIMEOUT_SECS: u64 = 10;
pub const LONG_POLL_DEADLINE_SECS: u64 = 25;

/// §4.9 duplicate-open debounce window for the panel.
pub const PANEL_DUPLICATE_OPEN_WINDOW_MS: u64 = 2_000;

/// Default HTTP ports (§6).
pub const DEFAULT_GATEWAY_PORT: u16 = 3000;
pub const DEFAULT_PANEL_PORT: u16 = 3001;
pub const DEFAULT_KIOSK_PORT: u16 = 3002;
