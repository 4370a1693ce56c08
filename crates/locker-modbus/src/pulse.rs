use std::thread;
use std::time::Duration;

use locker_core::constants::{
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_SINGLE_COIL, FRAME_RETRIES, FRAME_RETRY_SPACING_MS,
    MAX_PULSE_DURATION_MS, MIN_PULSE_DURATION_MS,
};
use locker_core::error::{LockerError, Result};

use crate::frame::{self, ResponseOutcome, COIL_OFF, COIL_ON};
use crate::health::HealthCounters;
use crate::transport::ModbusTransport;

/// One locker's hardware coordinates and pulse parameters (§4.6).
pub struct PulseRequest {
    pub card_address: u8,
    /// 1-based channel; `coil_address = channel - 1`.
    pub channel: u8,
    pub pulse_duration_ms: u64,
    pub use_multiple_coils: bool,
    pub verify_writes: bool,
    pub timeout: Duration,
}

fn send_with_retries(
    transport: &dyn ModbusTransport,
    build: impl Fn() -> Vec<u8>,
    card_address: u8,
    function_code: u8,
    timeout: Duration,
) -> Result<ResponseOutcome> {
    let mut last_err = None;
    for attempt in 0..=FRAME_RETRIES {
        if attempt > 0 {
            thread::sleep(Duration::from_millis(FRAME_RETRY_SPACING_MS));
        }
        let request = build();
        match transport
            .transact(&request, timeout)
            .and_then(|resp| frame::parse_response(&resp, card_address, function_code))
        {
            Ok(outcome) => return Ok(outcome),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or(LockerError::ModbusTimeout {
        card_address,
        channel: 0,
    }))
}

/// Executes one full pulse sequence (§4.6 steps 1-5). Updates `health` with
/// the outcome.
pub fn pulse(
    transport: &dyn ModbusTransport,
    req: &PulseRequest,
    health: &HealthCounters,
) -> Result<()> {
    let coil_address = (req.channel - 1) as u16;
    let duration_ms = req
        .pulse_duration_ms
        .clamp(MIN_PULSE_DURATION_MS, MAX_PULSE_DURATION_MS);

    let on_result = if req.use_multiple_coils {
        send_with_retries(
            transport,
            || frame::write_multiple_coils(req.card_address, coil_address, true),
            req.card_address,
            FC_WRITE_MULTIPLE_COILS,
            req.timeout,
        )
    } else {
        send_with_retries(
            transport,
            || frame::write_single_coil(req.card_address, coil_address, COIL_ON),
            req.card_address,
            FC_WRITE_SINGLE_COIL,
            req.timeout,
        )
    };

    let function_code_used = match on_result {
        Ok(_) if req.use_multiple_coils => FC_WRITE_MULTIPLE_COILS,
        Ok(_) => FC_WRITE_SINGLE_COIL,
        Err(_) if req.use_multiple_coils => {
            // Single alternative attempt, not counted against the frame's own retries.
            let fallback = transport
                .transact(
                    &frame::write_single_coil(req.card_address, coil_address, COIL_ON),
                    req.timeout,
                )
                .and_then(|resp| {
                    frame::parse_response(&resp, req.card_address, FC_WRITE_SINGLE_COIL)
                });
            match fallback {
                Ok(_) => FC_WRITE_SINGLE_COIL,
                Err(e) => {
                    health.record_failure(e.to_string());
                    return Err(e);
                }
            }
        }
        Err(e) => {
            health.record_failure(e.to_string());
            return Err(e);
        }
    };

    thread::sleep(Duration::from_millis(duration_ms));

    let off_result = if function_code_used == FC_WRITE_MULTIPLE_COILS {
        send_with_retries(
            transport,
            || frame::write_multiple_coils(req.card_address, coil_address, false),
            req.card_address,
            FC_WRITE_MULTIPLE_COILS,
            req.timeout,
        )
    } else {
        send_with_retries(
            transport,
            || frame::write_single_coil(req.card_address, coil_address, COIL_OFF),
            req.card_address,
            FC_WRITE_SINGLE_COIL,
            req.timeout,
        )
    };

    if off_result.is_err() {
        health.record_failure("relay_stuck_open");
        return Err(LockerError::RelayStuckOpen);
    }

    if req.verify_writes {
        match transport
            .transact(&frame::read_coils(req.card_address, coil_address), req.timeout)
            .and_then(|resp| frame::parse_response(&resp, req.card_address, 0x01))
        {
            Ok(ResponseOutcome::CoilValue(on)) if on => {
                tracing::warn!(
                    card_address = req.card_address,
                    channel = req.channel,
                    "coil read back ON after OFF frame; relay may re-latch between write and read"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "read-back verification failed; not treated as a pulse failure");
            }
        }
    }

    health.record_success();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeTransport;

    fn accept(card: u8, fc: u8) -> Vec<u8> {
        let mut frame = vec![card, fc, 0, 0, 0, 0];
        crate::crc::append_crc(&mut frame);
        frame
    }

    #[test]
    fn successful_pulse_sends_on_then_off_and_records_success() {
        let transport = FakeTransport::new();
        transport.push_response(Ok(accept(1, FC_WRITE_MULTIPLE_COILS)));
        transport.push_response(Ok(accept(1, FC_WRITE_MULTIPLE_COILS)));

        let health = HealthCounters::new();
        let req = PulseRequest {
            card_address: 1,
            channel: 6,
            pulse_duration_ms: 1, // keep test fast; clamped up to MIN internally isn't hit since >=100 required — use a tiny sleep override below
            use_multiple_coils: true,
            verify_writes: false,
            timeout: Duration::from_millis(50),
        };
        // pulse() clamps to MIN_PULSE_DURATION_MS; that's fine for a unit test's runtime.
        pulse(&transport, &req, &health).unwrap();

        assert_eq!(transport.requests().len(), 2);
        assert_eq!(health.total_commands(), 1);
    }

    #[test]
    fn falls_back_to_single_coil_when_multiple_coils_times_out() {
        let transport = FakeTransport::new();
        // 0x0F attempts all fail (FRAME_RETRIES+1 = 3 attempts).
        for _ in 0..=FRAME_RETRIES {
            transport.push_response(Err(LockerError::ModbusTimeout {
                card_address: 1,
                channel: 6,
            }));
        }
        // Fallback 0x05 ON succeeds.
        transport.push_response(Ok(accept(1, FC_WRITE_SINGLE_COIL)));
        // OFF via 0x05 succeeds.
        transport.push_response(Ok(accept(1, FC_WRITE_SINGLE_COIL)));

        let health = HealthCounters::new();
        let req = PulseRequest {
            card_address: 1,
            channel: 6,
            pulse_duration_ms: 1,
            use_multiple_coils: true,
            verify_writes: false,
            timeout: Duration::from_millis(50),
        };
        pulse(&transport, &req, &health).unwrap();
        assert_eq!(health.total_commands(), 1);
    }

    #[test]
    fn off_failure_after_retries_returns_relay_stuck_open() {
        let transport = FakeTransport::new();
        transport.push_response(Ok(accept(1, FC_WRITE_SINGLE_COIL))); // ON ok
        for _ in 0..=FRAME_RETRIES {
            transport.push_response(Err(LockerError::ModbusTimeout {
                card_address: 1,
                channel: 6,
            }));
        }

        let health = HealthCounters::new();
        let req = PulseRequest {
            card_address: 1,
            channel: 6,
            pulse_duration_ms: 1,
            use_multiple_coils: false,
            verify_writes: false,
            timeout: Duration::from_millis(50),
        };
        let err = pulse(&transport, &req, &health).unwrap_err();
        assert!(matches!(err, LockerError::RelayStuckOpen));
    }
}
