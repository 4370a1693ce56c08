//! Typed configuration (§6). Loaded from a single JSON file; overridable by
//! environment/CLI for a handful of paths (see each binary's `Args`).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::*;
use crate::error::{LockerError, Result};

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_panel_port() -> u16 {
    DEFAULT_PANEL_PORT
}
fn default_kiosk_port() -> u16 {
    DEFAULT_KIOSK_PORT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    #[serde(default = "default_panel_port")]
    pub panel_port: u16,
    #[serde(default = "default_kiosk_port")]
    pub kiosk_port: u16,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            gateway_port: DEFAULT_GATEWAY_PORT,
            panel_port: DEFAULT_PANEL_PORT,
            kiosk_port: DEFAULT_KIOSK_PORT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

impl Default for SerialParity {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default)]
    pub parity: SerialParity,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_pulse_duration_ms")]
    pub pulse_duration_ms: u64,
    #[serde(default = "default_true")]
    pub use_multiple_coils: bool,
    #[serde(default)]
    pub verify_writes: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_baudrate() -> u32 {
    9600
}
fn default_timeout_ms() -> u64 {
    DEFAULT_SERIAL_TIMEOUT_MS
}
fn default_pulse_duration_ms() -> u64 {
    DEFAULT_PULSE_DURATION_MS
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ModbusConfig {
    /// Clamp `pulse_duration_ms` to `[MIN_PULSE_DURATION_MS, MAX_PULSE_DURATION_MS]`.
    pub fn clamped_pulse_duration_ms(&self) -> u64 {
        self.pulse_duration_ms
            .clamp(MIN_PULSE_DURATION_MS, MAX_PULSE_DURATION_MS)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayCardConfig {
    pub slave_address: u8,
    pub channels: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub relay_cards: Vec<RelayCardConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockersConfig {
    pub total_count: u32,
    #[serde(default = "default_auto_release_hours")]
    pub auto_release_hours: u32,
    #[serde(default = "default_reservation_seconds")]
    pub reservation_seconds: u64,
}

fn default_auto_release_hours() -> u32 {
    24
}
fn default_reservation_seconds() -> u64 {
    DEFAULT_RESERVATION_SECONDS
}

/// An inclusive locker-id range, e.g. `[1, 40]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range(pub u32, pub u32);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub relay_cards: Vec<u8>,
    #[serde(default)]
    pub ranges: Vec<Range>,
}

impl ZoneConfig {
    /// Ranges normalized to merged, sorted, inclusive intervals (§6).
    pub fn normalized_ranges(&self) -> Vec<Range> {
        normalize_ranges(&self.ranges)
    }

    pub fn contains_locker(&self, locker_id: u32) -> bool {
        self.normalized_ranges()
            .iter()
            .any(|r| locker_id >= r.0 && locker_id <= r.1)
    }
}

/// Merge overlapping/adjacent inclusive ranges into sorted, disjoint ranges.
pub fn normalize_ranges(ranges: &[Range]) -> Vec<Range> {
    if ranges.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<Range> = ranges.to_vec();
    sorted.sort_by_key(|r| r.0);

    let mut merged = vec![sorted[0]];
    for r in &sorted[1..] {
        let last = merged.last_mut().unwrap();
        if r.0 <= last.1.saturating_add(1) {
            last.1 = last.1.max(r.1);
        } else {
            merged.push(*r);
        }
    }
    merged
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub zones_enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkIntervalConfig {
    #[serde(default = "default_bulk_min")]
    pub min_ms: u64,
    #[serde(default = "default_bulk_max")]
    pub max_ms: u64,
}

fn default_bulk_min() -> u64 {
    DEFAULT_BULK_MIN_INTERVAL_MS
}
fn default_bulk_max() -> u64 {
    DEFAULT_BULK_MAX_INTERVAL_MS
}

impl Default for BulkIntervalConfig {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_BULK_MIN_INTERVAL_MS,
            max_ms: DEFAULT_BULK_MAX_INTERVAL_MS,
        }
    }
}

impl BulkIntervalConfig {
    pub fn clamp(&self, interval_ms: u64) -> u64 {
        interval_ms.clamp(self.min_ms, self.max_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    #[serde(default)]
    pub bulk_interval: BulkIntervalConfig,
    #[serde(default = "default_depth_limit")]
    pub per_kiosk_depth_limit: usize,
}

fn default_queue_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_stale_threshold_ms() -> u64 {
    DEFAULT_STALE_THRESHOLD_MS
}
fn default_depth_limit() -> usize {
    DEFAULT_PER_KIOSK_DEPTH_LIMIT
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_BASE_MS,
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
            bulk_interval: BulkIntervalConfig::default(),
            per_kiosk_depth_limit: DEFAULT_PER_KIOSK_DEPTH_LIMIT,
        }
    }
}

/// Root configuration document (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: ServicesConfig,
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    pub lockers: LockersConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LockerError::Other(format!("reading config: {e}")))?;
        serde_json::from_str(&raw).map_err(|e| LockerError::Other(format!("parsing config: {e}")))
    }

    /// `card_address = ceil(locker_id / 16)`, `channel = ((locker_id-1) % 16) + 1` (§4.6).
    pub fn card_and_channel(locker_id: u32) -> (u8, u8) {
        let card = locker_id.div_ceil(CHANNELS_PER_CARD);
        let channel = ((locker_id - 1) % CHANNELS_PER_CARD) + 1;
        (card as u8, channel as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_merges_overlapping_and_adjacent() {
        let ranges = vec![Range(1, 5), Range(3, 8), Range(10, 12), Range(13, 15)];
        let merged = normalize_ranges(&ranges);
        assert_eq!(merged, vec![Range(1, 8), Range(10, 15)]);
    }

    #[test]
    fn normalize_sorts_unordered_input() {
        let ranges = vec![Range(20, 25), Range(1, 2)];
        let merged = normalize_ranges(&ranges);
        assert_eq!(merged, vec![Range(1, 2), Range(20, 25)]);
    }

    #[test]
    fn card_and_channel_mapping() {
        assert_eq!(Config::card_and_channel(1), (1, 1));
        assert_eq!(Config::card_and_channel(16), (1, 16));
        assert_eq!(Config::card_and_channel(17), (2, 1));
        assert_eq!(Config::card_and_channel(32), (2, 16));
        assert_eq!(Config::card_and_channel(33), (3, 1));
    }

    #[test]
    fn bulk_interval_clamps_both_directions() {
        let cfg = BulkIntervalConfig::default();
        assert_eq!(cfg.clamp(50), DEFAULT_BULK_MIN_INTERVAL_MS);
        assert_eq!(cfg.clamp(50_000), DEFAULT_BULK_MAX_INTERVAL_MS);
        assert_eq!(cfg.clamp(1000), 1000);
    }
}
