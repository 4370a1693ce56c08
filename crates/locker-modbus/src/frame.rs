use locker_core::constants::{FC_READ_COILS, FC_WRITE_MULTIPLE_COILS, FC_WRITE_SINGLE_COIL};
use locker_core::error::{LockerError, Result};

use crate::crc::{append_crc, verify_crc};

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// Build a `0x05 Write Single Coil` request frame.
pub fn write_single_coil(card_address: u8, coil_address: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![
        card_address,
        FC_WRITE_SINGLE_COIL,
        (coil_address >> 8) as u8,
        (coil_address & 0xFF) as u8,
        (value >> 8) as u8,
        (value & 0xFF) as u8,
    ];
    append_crc(&mut frame);
    frame
}

/// Build a `0x0F Write Multiple Coils` request frame for a single coil.
pub fn write_multiple_coils(card_address: u8, coil_address: u16, on: bool) -> Vec<u8> {
    let byte_count = 1u8;
    let coil_byte = if on { 0x01 } else { 0x00 };
    let mut frame = vec![
        card_address,
        FC_WRITE_MULTIPLE_COILS,
        (coil_address >> 8) as u8,
        (coil_address & 0xFF) as u8,
        0x00, // quantity of coils, high byte
        0x01, // quantity of coils, low byte (always 1: one locker per pulse)
        byte_count,
        coil_byte,
    ];
    append_crc(&mut frame);
    frame
}

/// Build a `0x01 Read Coils` request frame for a single coil.
pub fn read_coils(card_address: u8, coil_address: u16) -> Vec<u8> {
    let mut frame = vec![
        card_address,
        FC_READ_COILS,
        (coil_address >> 8) as u8,
        (coil_address & 0xFF) as u8,
        0x00,
        0x01,
    ];
    append_crc(&mut frame);
    frame
}

/// Parsed response outcome for a request we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Echoed the request (0x05/0x0F success case).
    Accepted,
    /// Coil value read back (0x01).
    CoilValue(bool),
}

/// Validate and classify a response frame against the `card_address` and
/// function code we sent. Exception responses (function code | 0x80) and CRC
/// failures are surfaced as typed errors.
pub fn parse_response(
    response: &[u8],
    card_address: u8,
    function_code: u8,
) -> Result<ResponseOutcome> {
    if response.len() < 4 {
        return Err(LockerError::ModbusTimeout {
            card_address,
            channel: 0,
        });
    }
    if !verify_crc(response) {
        return Err(LockerError::ModbusCrcMismatch);
    }
    if response[0] != card_address {
        return Err(LockerError::UnknownCard(response[0]));
    }

    let resp_fc = response[1];
    if resp_fc & 0x80 != 0 {
        let exception_code = *response.get(2).unwrap_or(&0);
        return Err(LockerError::ModbusException(exception_code));
    }
    if resp_fc != function_code {
        return Err(LockerError::ModbusException(0));
    }

    match function_code {
        FC_READ_COILS => {
            let byte_count = response[2] as usize;
            if response.len() < 3 + byte_count {
                return Err(LockerError::ModbusCrcMismatch);
            }
            let coil_byte = response[3];
            Ok(ResponseOutcome::CoilValue(coil_byte & 0x01 != 0))
        }
        FC_WRITE_SINGLE_COIL | FC_WRITE_MULTIPLE_COILS => Ok(ResponseOutcome::Accepted),
        _ => Err(LockerError::ModbusException(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_single_coil_frame_has_valid_crc() {
        let frame = write_single_coil(1, 5, COIL_ON);
        assert!(verify_crc(&frame));
        assert_eq!(frame[0], 1);
        assert_eq!(frame[1], FC_WRITE_SINGLE_COIL);
    }

    #[test]
    fn parse_response_detects_exception() {
        let mut frame = vec![1, FC_WRITE_SINGLE_COIL | 0x80, 0x02];
        append_crc(&mut frame);
        let err = parse_response(&frame, 1, FC_WRITE_SINGLE_COIL).unwrap_err();
        assert!(matches!(err, LockerError::ModbusException(0x02)));
    }

    #[test]
    fn parse_response_accepts_matching_echo() {
        let frame = write_single_coil(1, 5, COIL_ON);
        let outcome = parse_response(&frame, 1, FC_WRITE_SINGLE_COIL).unwrap();
        assert_eq!(outcome, ResponseOutcome::Accepted);
    }

    #[test]
    fn parse_response_rejects_bad_crc() {
        let mut frame = write_single_coil(1, 5, COIL_ON);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = parse_response(&frame, 1, FC_WRITE_SINGLE_COIL).unwrap_err();
        assert!(matches!(err, LockerError::ModbusCrcMismatch));
    }
}
