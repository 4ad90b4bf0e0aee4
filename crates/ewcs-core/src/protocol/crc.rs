//! CRC16-MODBUS
//!
//! Polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF, no final XOR.
//! The PIC24 link sends the checksum high byte first; the charger's Modbus
//! trailer sends it low byte first.

const INITIAL: u16 = 0xFFFF;
const POLY: u16 = 0xA001;

/// Compute the CRC16-MODBUS checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checksum of `data` as a Modbus trailer (low byte first)
pub fn crc16_le_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}

/// Check a frame whose last two bytes are a low-byte-first CRC16 trailer.
///
/// Returns `(expected, actual)` on mismatch.
pub fn verify_trailer_le(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 2 {
        return Err((crc16(&[]), 0));
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
    if expected == actual {
        Ok(())
    } else {
        Err((expected, actual))
    }
}
