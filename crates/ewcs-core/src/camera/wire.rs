//! Spinel camera wire format
//!
//! All frames start with the `0x90 0xEB` header followed by the device id
//! and a command byte. Multi-byte fields are little-endian.

use byteorder::{ByteOrder, LittleEndian};

/// Frame header
pub const HEADER: [u8; 2] = [0x90, 0xEB];
/// Address of the camera on its link
pub const DEVICE_ID: u8 = 0x01;
/// Take-snapshot command, also echoed by the ready signal
pub const CMD_SNAPSHOT: u8 = 0x40;
/// Read-packet command
pub const CMD_READ_PACKET: u8 = 0x48;
/// Packet data response
pub const CMD_PACKET_DATA: u8 = 0x49;

/// Length of the ready signal announcing a finished snapshot
pub const READY_SIGNAL_LEN: usize = 19;
/// Offset of the little-endian snapshot size in the ready signal
pub const READY_SIZE_OFFSET: usize = 7;
/// Offset of the command byte in every frame
pub const TYPE_OFFSET: usize = 3;

/// Start of every packet data response
pub const PACKET_MARKER: [u8; 4] = [HEADER[0], HEADER[1], DEVICE_ID, CMD_PACKET_DATA];
/// Bytes preceding the payload of a packet data response
pub const ENVELOPE_LEN: usize = 8;
/// Offset of the little-endian payload length inside the envelope
pub const ENVELOPE_LEN_OFFSET: usize = 4;

/// Fixed snapshot command: full resolution, default quality
pub fn snapshot_command() -> [u8; 12] {
    [
        HEADER[0],
        HEADER[1],
        DEVICE_ID,
        CMD_SNAPSHOT,
        0x04,
        0x00,
        0x00,
        0x02,
        0x05,
        0x05,
        0xC1,
        0xC2,
    ]
}

/// Request `size` image bytes starting at `address`
pub fn packet_request(address: u32, size: u16) -> [u8; 12] {
    let mut cmd = [0u8; 12];
    cmd[..6].copy_from_slice(&[HEADER[0], HEADER[1], DEVICE_ID, CMD_READ_PACKET, 0x06, 0x00]);
    LittleEndian::write_u32(&mut cmd[6..10], address);
    LittleEndian::write_u16(&mut cmd[10..12], size);
    cmd
}

/// Whether a complete 19-byte frame is a ready signal
pub fn is_ready_signal(frame: &[u8]) -> bool {
    frame.len() >= READY_SIGNAL_LEN && frame[..2] == HEADER && frame[TYPE_OFFSET] == CMD_SNAPSHOT
}

/// Snapshot size announced by a ready signal
pub fn ready_snapshot_size(frame: &[u8]) -> Option<u32> {
    if !is_ready_signal(frame) {
        return None;
    }
    Some(LittleEndian::read_u32(
        &frame[READY_SIZE_OFFSET..READY_SIZE_OFFSET + 4],
    ))
}

/// Payload length declared by a packet envelope
pub fn envelope_payload_len(envelope: &[u8]) -> usize {
    LittleEndian::read_u16(&envelope[ENVELOPE_LEN_OFFSET..ENVELOPE_LEN_OFFSET + 2]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_request_layout() {
        let cmd = packet_request(1536, 464);
        assert_eq!(
            cmd,
            [0x90, 0xEB, 0x01, 0x48, 0x06, 0x00, 0x00, 0x06, 0x00, 0x00, 0xD0, 0x01]
        );
    }

    #[test]
    fn test_ready_signal_size() {
        let mut frame = [0u8; READY_SIGNAL_LEN];
        frame[..4].copy_from_slice(&[0x90, 0xEB, 0x01, 0x40]);
        frame[READY_SIZE_OFFSET..READY_SIZE_OFFSET + 4].copy_from_slice(&2000u32.to_le_bytes());
        assert_eq!(ready_snapshot_size(&frame), Some(2000));

        frame[TYPE_OFFSET] = 0x49;
        assert_eq!(ready_snapshot_size(&frame), None);
    }
}
