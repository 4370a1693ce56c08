use std::sync::Arc;
use std::time::Duration;

use locker_core::config::{BulkIntervalConfig, Config, HardwareConfig, ModbusConfig};
use locker_core::error::Result;
use locker_core::types::LockerNum;
use locker_core::GuardMap;
use locker_modbus::{pulse_locker, HealthCounters, ModbusTransport, PulseRequest};

use crate::hardware::HardwareTable;

/// One locker's pulse outcome, paired with its id (for per-locker reporting
/// and bulk-failure aggregation).
pub struct PulseOutcome {
    pub locker_id: LockerNum,
    pub result: Result<()>,
}

/// Wraps the serial port, health counters, hardware table, and per-locker
/// guards behind the §4.5/§4.6 pulse sequence, independent of how outcomes
/// get reported back to the Gateway.
pub struct PulseEngine {
    transport: Arc<dyn ModbusTransport>,
    health: Arc<HealthCounters>,
    hardware: HardwareTable,
    guards: GuardMap<LockerNum>,
    modbus_config: ModbusConfig,
    bulk_interval: BulkIntervalConfig,
}

impl PulseEngine {
    pub fn new(
        transport: Arc<dyn ModbusTransport>,
        modbus_config: ModbusConfig,
        hardware_config: &HardwareConfig,
        bulk_interval: BulkIntervalConfig,
    ) -> Self {
        Self {
            transport,
            health: Arc::new(HealthCounters::new()),
            hardware: HardwareTable::from_config(hardware_config),
            guards: GuardMap::new(),
            modbus_config,
            bulk_interval,
        }
    }

    pub fn health(&self) -> &HealthCounters {
        &self.health
    }

    /// A shared handle to the same counters `health()` borrows from — for
    /// tasks (heartbeat sender, health endpoint) that outlive any one
    /// borrow of the engine.
    pub fn health_counters(&self) -> Arc<HealthCounters> {
        Arc::clone(&self.health)
    }

    /// One locker: acquire its guard, validate the hardware table, run the
    /// pulse sequence on a blocking thread (it sleeps for
    /// `pulse_duration_ms` and may block on real serial I/O).
    pub async fn pulse_one(&self, locker_id: LockerNum) -> Result<()> {
        let _guard = self.guards.acquire(&locker_id).await;

        let (card_address, channel) = Config::card_and_channel(locker_id);
        self.hardware.require_card(card_address)?;

        let transport = self.transport.clone();
        let health = self.health.clone();
        let request = PulseRequest {
            card_address,
            channel,
            pulse_duration_ms: self.modbus_config.clamped_pulse_duration_ms(),
            use_multiple_coils: self.modbus_config.use_multiple_coils,
            verify_writes: self.modbus_config.verify_writes,
            timeout: Duration::from_millis(self.modbus_config.timeout_ms),
        };

        tokio::task::spawn_blocking(move || pulse_locker(transport.as_ref(), &request, &health))
            .await
            .map_err(|e| locker_core::error::LockerError::Other(format!("pulse task panicked: {e}")))?
    }

    /// Pulses every locker in `locker_ids`, one at a time in payload order,
    /// sleeping `clamped(interval_ms)` between lockers (§4.5 steps 4-5). A
    /// failed locker does not stop the remaining ones — each coil is
    /// independent hardware, and stranding the rest behind one bad card
    /// would undo work the staff member explicitly asked for.
    pub async fn pulse_bulk(
        &self,
        locker_ids: &[LockerNum],
        interval_ms: u64,
    ) -> Vec<PulseOutcome> {
        let spacing = Duration::from_millis(self.bulk_interval.clamp(interval_ms));
        let mut outcomes = Vec::with_capacity(locker_ids.len());
        for (i, locker_id) in locker_ids.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            let result = self.pulse_one(*locker_id).await;
            outcomes.push(PulseOutcome {
                locker_id: *locker_id,
                result,
            });
        }
        outcomes
    }
}

/// Aggregates per-locker bulk outcomes into one command-level result:
/// `(all_succeeded, error_summary, retryable)`.
pub fn aggregate_bulk_outcome(outcomes: &[PulseOutcome]) -> (bool, Option<String>, bool) {
    let mut failures = Vec::new();
    let mut any_retryable = false;
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            failures.push(format!("{}: {}", outcome.locker_id, e.short_message()));
            any_retryable = any_retryable || e.retryable();
        }
    }
    if failures.is_empty() {
        (true, None, false)
    } else {
        (false, Some(failures.join("; ")), any_retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::config::RelayCardConfig;
    use locker_modbus::FakeTransport;

    fn accept(card: u8, fc: u8) -> Vec<u8> {
        let mut frame = vec![card, fc, 0, 0, 0, 0];
        locker_modbus::crc::append_crc(&mut frame);
        frame
    }

    fn engine_with(transport: FakeTransport) -> PulseEngine {
        let hardware = HardwareConfig {
            relay_cards: vec![RelayCardConfig {
                slave_address: 1,
                channels: 16,
                enabled: true,
            }],
        };
        PulseEngine::new(
            Arc::new(transport),
            ModbusConfig {
                port: "fake".into(),
                baudrate: 9600,
                parity: Default::default(),
                timeout_ms: 50,
                pulse_duration_ms: 1,
                use_multiple_coils: true,
                verify_writes: false,
                max_retries: 2,
            },
            &hardware,
            BulkIntervalConfig::default(),
        )
    }

    #[tokio::test]
    async fn pulse_one_rejects_unknown_card_without_touching_the_transport() {
        let transport = FakeTransport::new();
        let engine = engine_with(transport);
        let err = engine.pulse_one(50).await.unwrap_err(); // card 4, not in the table
        assert!(matches!(err, locker_core::error::LockerError::UnknownCard(4)));
    }

    #[tokio::test]
    async fn pulse_one_succeeds_against_a_known_card() {
        let transport = FakeTransport::new();
        transport.push_response(Ok(accept(1, locker_core::constants::FC_WRITE_MULTIPLE_COILS)));
        transport.push_response(Ok(accept(1, locker_core::constants::FC_WRITE_MULTIPLE_COILS)));
        let engine = engine_with(transport);
        engine.pulse_one(6).await.unwrap();
        assert_eq!(engine.health().total_commands(), 1);
    }

    #[tokio::test]
    async fn pulse_bulk_continues_past_an_unknown_card_and_aggregates_the_failure() {
        let transport = FakeTransport::new();
        // locker 6 -> card 1 (known, succeeds)
        transport.push_response(Ok(accept(1, locker_core::constants::FC_WRITE_MULTIPLE_COILS)));
        transport.push_response(Ok(accept(1, locker_core::constants::FC_WRITE_MULTIPLE_COILS)));
        let engine = engine_with(transport);

        // locker 33 -> card 3, not configured -> UnknownCard, no transport call consumed.
        let outcomes = engine.pulse_bulk(&[6, 33], 100).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());

        let (all_ok, error, retryable) = aggregate_bulk_outcome(&outcomes);
        assert!(!all_ok);
        assert!(error.unwrap().contains("33"));
        assert!(!retryable); // UnknownCard is not retryable
    }
}
