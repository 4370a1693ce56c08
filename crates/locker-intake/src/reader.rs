use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use locker_core::error::{LockerError, Result};

/// Abstracts the physical RFID/QR reader so the kiosk's scan loop can run
/// against real hardware or a scripted fake in tests (mirrors
/// `locker-modbus`'s `ModbusTransport`).
pub trait RfidReader: Send {
    /// Blocks until one scan arrives and returns it exactly as the reader
    /// produced it — normalization happens downstream, in
    /// [`crate::normalize`].
    fn read_scan(&mut self) -> Result<String>;
}

/// Reads newline-terminated scans off a serial-attached reader.
pub struct SerialRfidReader {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
}

impl SerialRfidReader {
    pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(device, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| LockerError::Other(format!("opening rfid reader {device}: {e}")))?;
        Ok(Self {
            reader: BufReader::new(port),
        })
    }
}

impl RfidReader for SerialRfidReader {
    fn read_scan(&mut self) -> Result<String> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| LockerError::Other(format!("reading rfid scan: {e}")))?;
        Ok(line.trim().to_string())
    }
}

/// Scripted reader for tests and local development — yields queued scans in
/// order, then errors once exhausted.
#[derive(Default)]
pub struct FakeRfidReader {
    scans: VecDeque<String>,
}

impl FakeRfidReader {
    pub fn new(scans: Vec<String>) -> Self {
        Self {
            scans: scans.into(),
        }
    }

    pub fn push(&mut self, scan: impl Into<String>) {
        self.scans.push_back(scan.into());
    }
}

impl RfidReader for FakeRfidReader {
    fn read_scan(&mut self) -> Result<String> {
        self.scans
            .pop_front()
            .ok_or_else(|| LockerError::Other("no more scans queued".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_reader_yields_scans_in_order_then_errors() {
        let mut reader = FakeRfidReader::new(vec!["A1".into(), "B2".into()]);
        assert_eq!(reader.read_scan().unwrap(), "A1");
        assert_eq!(reader.read_scan().unwrap(), "B2");
        assert!(reader.read_scan().is_err());
    }
}
