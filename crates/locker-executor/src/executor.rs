use std::sync::{Arc, Mutex};
use std::time::Duration;

use locker_client::GatewayClient;
use locker_core::types::{Command, CommandPayload, KioskId, LockerNum};

use crate::pulse_engine::{aggregate_bulk_outcome, PulseEngine};
use crate::recent::{CachedOutcome, RecentOutcomes};

/// §4.5's Kiosk Command Executor: drains the Command Queue for one
/// `kiosk_id` via the Gateway HTTP API and actuates hardware through a
/// shared [`PulseEngine`] — shared with the RFID/QR intake loop, since both
/// ultimately pulse through the one serial port this process owns.
pub struct Executor {
    kiosk_id: KioskId,
    client: Arc<GatewayClient>,
    engine: Arc<PulseEngine>,
    recent: Mutex<RecentOutcomes>,
    poll_interval: Duration,
}

impl Executor {
    pub fn new(
        kiosk_id: KioskId,
        client: Arc<GatewayClient>,
        engine: Arc<PulseEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kiosk_id,
            client,
            engine,
            recent: Mutex::new(RecentOutcomes::default()),
            poll_interval,
        }
    }

    pub fn health(&self) -> &locker_modbus::HealthCounters {
        self.engine.health()
    }

    /// Claim/execute loop. Runs until cancelled — callers `tokio::spawn` it
    /// and hold the `JoinHandle`.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.client.claim_next(&self.kiosk_id).await {
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::warn!(error = %e, "claim_next failed; will retry");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn execute(&self, command: Command) {
        let command_id = command.command_id.clone();

        if let Some(cached) = self.recent.lock().unwrap().get(&command_id) {
            tracing::info!(
                command_id = %command_id,
                "replaying cached outcome for a redelivered command"
            );
            self.report_terminal(&command_id, &cached).await;
            return;
        }

        tracing::info!(
            command_id = %command_id,
            staff_user = command.payload.staff_user(),
            reason = command.payload.reason(),
            kiosk_id = %self.kiosk_id,
            locker_id = ?command.payload.locker_ids(),
            "executing command"
        );

        let outcome = match &command.payload {
            CommandPayload::OpenLocker { locker_id, .. } => {
                let result = self.engine.pulse_one(*locker_id).await;
                self.report_pulse(&command_id, *locker_id, &result).await;
                let retryable = result.as_ref().err().map(|e| e.retryable()).unwrap_or(false);
                CachedOutcome {
                    succeeded: result.is_ok(),
                    error: result.err().map(|e| e.short_message()),
                    retryable,
                }
            }
            CommandPayload::BulkOpen {
                locker_ids,
                interval_ms,
                ..
            } => {
                let pulses = self.engine.pulse_bulk(locker_ids, *interval_ms).await;
                for pulse in &pulses {
                    self.report_pulse(&command_id, pulse.locker_id, &pulse.result)
                        .await;
                }
                let (succeeded, error, retryable) = aggregate_bulk_outcome(&pulses);
                CachedOutcome {
                    succeeded,
                    error,
                    retryable,
                }
            }
            // Block/Unblock are pure state transitions applied by the Gateway
            // at enqueue time (no hardware to actuate, no `Opening` staging
            // state) — the Kiosk still claims and completes them so every
            // command type flows through one uniform lifecycle.
            CommandPayload::Block { .. } | CommandPayload::Unblock { .. } => CachedOutcome {
                succeeded: true,
                error: None,
                retryable: false,
            },
        };

        tracing::info!(
            command_id = %command_id,
            succeeded = outcome.succeeded,
            error = ?outcome.error,
            "command execution finished"
        );

        self.recent
            .lock()
            .unwrap()
            .insert(command_id.clone(), outcome.clone());
        self.report_terminal(&command_id, &outcome).await;
    }

    async fn report_pulse(
        &self,
        command_id: &str,
        locker_id: LockerNum,
        result: &locker_core::error::Result<()>,
    ) {
        let (succeeded, error, retryable) = match result {
            Ok(()) => (true, None, false),
            Err(e) => (false, Some(e.short_message()), e.retryable()),
        };
        if let Err(e) = self
            .client
            .report_pulse_result(
                &self.kiosk_id,
                locker_id,
                command_id,
                succeeded,
                error,
                retryable,
            )
            .await
        {
            tracing::warn!(
                command_id = %command_id,
                locker_id,
                error = %e,
                "failed to report pulse result to gateway"
            );
        }
    }

    async fn report_terminal(&self, command_id: &str, outcome: &CachedOutcome) {
        let result = if outcome.succeeded {
            self.client.complete_command(&self.kiosk_id, command_id).await
        } else {
            self.client
                .fail_command(
                    &self.kiosk_id,
                    command_id,
                    outcome.error.as_deref().unwrap_or("unknown error"),
                    outcome.retryable,
                )
                .await
        };
        if let Err(e) = result {
            tracing::warn!(
                command_id = %command_id,
                error = %e,
                "failed to report command outcome to gateway"
            );
        }
    }
}
