use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use locker_core::config::SerialParity;
use locker_core::error::{LockerError, Result};

/// Maps the config-file parity enum onto `serialport`'s, keeping
/// `locker-core` free of a hardware-crate dependency.
pub fn serial_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Abstracts the physical RS-485 port so the pulse sequence can run against
/// a real port or an in-memory fake in tests (§5 — "exactly one in-flight
/// frame per port; serialized through a single mailbox").
pub trait ModbusTransport: Send + Sync {
    fn transact(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

/// Real RS-485 transport over `serialport`. A `Mutex` gives the single
/// in-flight-frame mailbox guarantee regardless of caller concurrency.
pub struct SerialTransport {
    port: Mutex<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    pub fn open(
        device: &str,
        baud_rate: u32,
        parity: serialport::Parity,
        timeout: Duration,
    ) -> Result<Self> {
        let port = serialport::new(device, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(parity)
            .timeout(timeout)
            .open()
            .map_err(|e| LockerError::Other(format!("opening serial port {device}: {e}")))?;
        Ok(Self {
            port: Mutex::new(port),
        })
    }
}

impl ModbusTransport for SerialTransport {
    fn transact(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let mut port = self.port.lock().expect("serial port mutex poisoned");
        port.set_timeout(timeout)
            .map_err(|e| LockerError::Other(format!("setting serial timeout: {e}")))?;
        port.write_all(request)
            .map_err(|_| LockerError::ModbusTimeout {
                card_address: request.first().copied().unwrap_or(0),
                channel: 0,
            })?;

        let mut response = vec![0u8; 256];
        let n = port
            .read(&mut response)
            .map_err(|_| LockerError::ModbusTimeout {
                card_address: request.first().copied().unwrap_or(0),
                channel: 0,
            })?;
        response.truncate(n);
        Ok(response)
    }
}

/// Scripted in-memory transport for unit tests — queues a canned response
/// (or error) per call.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<std::collections::VecDeque<Result<Vec<u8>>>>,
    requests: Mutex<Vec<Vec<u8>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<Vec<u8>>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModbusTransport for FakeTransport {
    fn transact(&self, request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LockerError::ModbusTimeout {
                    card_address: request.first().copied().unwrap_or(0),
                    channel: 0,
                })
            })
    }
}
