//! Capture session state machine
//!
//! Synchronous core of the camera engine: consumes received bytes and tells
//! the caller what to send next. Timers live in the engine.

use serde::Serialize;

use super::wire::{
    self, ENVELOPE_LEN, HEADER, PACKET_MARKER, READY_SIGNAL_LEN, TYPE_OFFSET,
};
use crate::protocol::{ByteAccumulator, DeviceError};

/// Largest snapshot accepted from a ready signal
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 4 * 1024 * 1024;

/// Check that `packet_size` fits the request's 16-bit size field and that a
/// whole packet plus its envelope fits in `max_buffered`
pub fn check_packet_geometry(packet_size: usize, max_buffered: usize) -> Result<(), DeviceError> {
    if packet_size == 0 || packet_size > u16::MAX as usize {
        return Err(DeviceError::InvalidArgument(format!(
            "camera packet size {} outside 1-{}",
            packet_size,
            u16::MAX
        )));
    }
    if max_buffered < packet_size + ENVELOPE_LEN {
        return Err(DeviceError::InvalidArgument(format!(
            "camera buffer of {} bytes cannot hold a {} byte packet",
            max_buffered, packet_size
        )));
    }
    Ok(())
}

/// Capture progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// No capture running
    Idle = 0,
    /// Snapshot requested, waiting for the ready signal
    Requesting = 1,
    /// Packet requested, waiting for its data
    AwaitingPacket = 2,
    /// All packets received
    Assembling = 3,
}

/// What the engine has to do after feeding bytes
#[derive(Debug)]
pub enum CaptureAction {
    /// Write these bytes to the camera
    Send(Vec<u8>),
    /// Image fully assembled
    Complete(Vec<u8>),
    /// Capture failed; the session is already reset
    Fail(DeviceError),
}

/// One image transfer
#[derive(Debug)]
pub struct CaptureSession {
    state: CaptureState,
    nominal_packet_size: usize,
    packet_size: usize,
    packet_count: usize,
    packet_index: usize,
    remainder_size: usize,
    snapshot_size: usize,
    max_image_size: usize,
    image: Vec<u8>,
    retry_count: u32,
    max_retries: u32,
    rx: ByteAccumulator,
}

impl CaptureSession {
    /// Create an idle session
    pub fn new(packet_size: usize, max_retries: u32, max_buffered: usize) -> Result<Self, DeviceError> {
        check_packet_geometry(packet_size, max_buffered)?;
        Ok(Self {
            state: CaptureState::Idle,
            nominal_packet_size: packet_size,
            packet_size,
            packet_count: 0,
            packet_index: 0,
            remainder_size: 0,
            snapshot_size: 0,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            image: Vec::new(),
            retry_count: 0,
            max_retries,
            rx: ByteAccumulator::with_limit(max_buffered),
        })
    }

    /// Refuse ready signals announcing more than `limit` bytes
    pub fn with_max_image_size(mut self, limit: usize) -> Self {
        self.max_image_size = limit;
        self
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Size of the packet currently requested
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Number of full-size packets in this image
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Index of the next packet to receive
    pub fn packet_index(&self) -> usize {
        self.packet_index
    }

    /// Size of the short final packet (0 if none)
    pub fn remainder_size(&self) -> usize {
        self.remainder_size
    }

    /// Image size announced by the ready signal
    pub fn snapshot_size(&self) -> usize {
        self.snapshot_size
    }

    /// Attempts made since the last successful capture
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Bytes held by the session (image so far plus unparsed input)
    pub fn buffered_bytes(&self) -> usize {
        self.image.len() + self.rx.len()
    }

    /// Begin (or retry) a capture; returns the snapshot command to send
    pub fn start_capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.bump_retry()?;
        self.reset_capture_state();
        self.state = CaptureState::Requesting;
        Ok(wire::snapshot_command().to_vec())
    }

    /// Re-request the current packet after it failed to arrive
    pub fn retry_packet(&mut self) -> Result<Vec<u8>, DeviceError> {
        if self.state != CaptureState::AwaitingPacket {
            return Err(DeviceError::InvalidArgument(format!(
                "no packet outstanding in state {:?}",
                self.state
            )));
        }
        self.bump_retry()?;
        self.rx.clear();
        Ok(self.current_request())
    }

    fn bump_retry(&mut self) -> Result<(), DeviceError> {
        self.retry_count += 1;
        if self.retry_count > self.max_retries {
            let attempts = self.max_retries;
            self.reset_capture_state();
            self.retry_count = 0;
            tracing::warn!(attempts, "camera capture retries exhausted");
            return Err(DeviceError::RetryExhausted { attempts });
        }
        Ok(())
    }

    /// Forget the retry history
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    /// Drop any transfer in progress and return to idle
    pub fn reset_capture_state(&mut self) {
        self.state = CaptureState::Idle;
        self.packet_size = self.nominal_packet_size;
        self.packet_count = 0;
        self.packet_index = 0;
        self.remainder_size = 0;
        self.snapshot_size = 0;
        self.image = Vec::new();
        self.rx.clear();
    }

    fn current_request(&self) -> Vec<u8> {
        let address = (self.packet_index * self.nominal_packet_size) as u32;
        wire::packet_request(address, self.packet_size as u16).to_vec()
    }

    /// Consume received bytes.
    ///
    /// Only an accumulator overflow is returned as an error; protocol
    /// outcomes come back as actions.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<CaptureAction>, DeviceError> {
        if let Err(e) = self.rx.extend(chunk) {
            self.reset_capture_state();
            return Err(e);
        }

        let mut actions = Vec::new();
        loop {
            let progressed = match self.state {
                CaptureState::Idle | CaptureState::Requesting => self.poll_ready(&mut actions),
                CaptureState::AwaitingPacket => self.poll_packet(&mut actions),
                CaptureState::Assembling => {
                    actions.push(self.assemble());
                    false
                }
            };
            if !progressed {
                break;
            }
        }
        Ok(actions)
    }

    fn poll_ready(&mut self, actions: &mut Vec<CaptureAction>) -> bool {
        if !self.rx.sync_to(&HEADER) || !self.rx.has(READY_SIGNAL_LEN) {
            return false;
        }
        if self.rx.peek()[TYPE_OFFSET] != wire::CMD_SNAPSHOT {
            // Not a ready signal: skip this header and keep scanning
            self.rx.discard(1);
            return true;
        }
        let Some(frame) = self.rx.take(READY_SIGNAL_LEN) else {
            return false;
        };
        let size = wire::ready_snapshot_size(&frame).unwrap_or(0) as usize;
        tracing::info!(size, "camera ready signal");
        if size == 0 || size > self.max_image_size {
            self.reset_capture_state();
            actions.push(CaptureAction::Fail(DeviceError::InvalidResponse(format!(
                "camera announced a {} byte snapshot (limit {})",
                size, self.max_image_size
            ))));
            return false;
        }

        self.snapshot_size = size;
        self.packet_count = size / self.nominal_packet_size;
        self.remainder_size = size % self.nominal_packet_size;
        self.packet_index = 0;
        self.packet_size = if self.packet_count == 0 {
            self.remainder_size
        } else {
            self.nominal_packet_size
        };
        self.image = Vec::with_capacity(size);
        self.state = CaptureState::AwaitingPacket;
        actions.push(CaptureAction::Send(self.current_request()));
        true
    }

    fn poll_packet(&mut self, actions: &mut Vec<CaptureAction>) -> bool {
        if !self.rx.sync_to(&PACKET_MARKER) {
            return false;
        }
        let Some(packet) = self.rx.take(ENVELOPE_LEN + self.packet_size) else {
            return false;
        };
        let (envelope, payload) = packet.split_at(ENVELOPE_LEN);
        let declared = wire::envelope_payload_len(envelope);
        if declared != self.packet_size {
            tracing::warn!(declared, expected = self.packet_size, "camera packet length differs");
        }
        self.image
            .extend_from_slice(&payload[..declared.min(self.packet_size)]);
        self.packet_index += 1;
        tracing::debug!(index = self.packet_index, total = self.image.len(), "camera packet");

        if self.packet_index < self.packet_count {
            self.packet_size = self.nominal_packet_size;
            actions.push(CaptureAction::Send(self.current_request()));
        } else if self.packet_index == self.packet_count && self.remainder_size > 0 {
            self.packet_size = self.remainder_size;
            actions.push(CaptureAction::Send(self.current_request()));
        } else {
            self.packet_size = self.nominal_packet_size;
            self.state = CaptureState::Assembling;
        }
        true
    }

    fn assemble(&mut self) -> CaptureAction {
        let expected = self.snapshot_size;
        let image = std::mem::take(&mut self.image);
        self.reset_capture_state();
        if image.len() == expected {
            self.retry_count = 0;
            CaptureAction::Complete(image)
        } else {
            CaptureAction::Fail(DeviceError::SizeMismatch {
                expected,
                actual: image.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::wire::{READY_SIZE_OFFSET, CMD_READ_PACKET};
    use byteorder::{ByteOrder, LittleEndian};

    fn ready_signal(size: u32) -> Vec<u8> {
        let mut frame = vec![0u8; READY_SIGNAL_LEN];
        frame[..4].copy_from_slice(&[0x90, 0xEB, 0x01, 0x40]);
        frame[READY_SIZE_OFFSET..READY_SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
        frame
    }

    fn packet(fill: u8, len: usize) -> Vec<u8> {
        let mut bytes = PACKET_MARKER.to_vec();
        bytes.extend_from_slice(&(len as u16).to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend(std::iter::repeat(fill).take(len));
        bytes
    }

    fn sent_request(action: &CaptureAction) -> (u32, u16) {
        match action {
            CaptureAction::Send(cmd) => {
                assert_eq!(cmd[3], CMD_READ_PACKET);
                (
                    LittleEndian::read_u32(&cmd[6..10]),
                    LittleEndian::read_u16(&cmd[10..12]),
                )
            }
            other => panic!("expected a packet request, got {:?}", other),
        }
    }

    #[test]
    fn test_transfer_with_short_final_packet() {
        let mut session = CaptureSession::new(768, 5, 64 * 1024).unwrap();
        session.start_capture().unwrap();
        assert_eq!(session.state(), CaptureState::Requesting);

        let actions = session.feed(&ready_signal(2000)).unwrap();
        assert_eq!(session.packet_count(), 2);
        assert_eq!(session.remainder_size(), 464);
        assert_eq!(sent_request(&actions[0]), (0, 768));

        let actions = session.feed(&packet(0x11, 768)).unwrap();
        assert_eq!(sent_request(&actions[0]), (768, 768));

        let actions = session.feed(&packet(0x22, 768)).unwrap();
        assert_eq!(sent_request(&actions[0]), (1536, 464));
        assert_eq!(session.packet_index(), 2);

        let actions = session.feed(&packet(0x33, 464)).unwrap();
        match &actions[..] {
            [CaptureAction::Complete(image)] => {
                assert_eq!(image.len(), 2000);
                assert_eq!(image[1999], 0x33);
            }
            other => panic!("unexpected actions {:?}", other),
        }
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.packet_size(), 768);
    }

    #[test]
    fn test_noise_before_packet_marker() {
        let mut session = CaptureSession::new(16, 5, 1024).unwrap();
        session.start_capture().unwrap();
        session.feed(&ready_signal(16)).unwrap();

        let mut noisy = vec![0x00, 0x90, 0x13];
        noisy.extend(packet(0x7E, 16));
        let (head, tail) = noisy.split_at(7);
        assert!(session.feed(head).unwrap().is_empty());
        let actions = session.feed(tail).unwrap();
        assert!(matches!(&actions[..], [CaptureAction::Complete(img)] if img.len() == 16));
    }

    #[test]
    fn test_exact_multiple_has_no_short_packet() {
        let mut session = CaptureSession::new(8, 5, 1024).unwrap();
        session.start_capture().unwrap();
        session.feed(&ready_signal(16)).unwrap();
        let actions = session.feed(&packet(1, 8)).unwrap();
        assert_eq!(sent_request(&actions[0]), (8, 8));
        let actions = session.feed(&packet(2, 8)).unwrap();
        assert!(matches!(&actions[..], [CaptureAction::Complete(img)] if img.len() == 16));
    }

    #[test]
    fn test_short_envelope_reports_size_mismatch() {
        let mut session = CaptureSession::new(8, 5, 1024).unwrap();
        session.start_capture().unwrap();
        session.feed(&ready_signal(8)).unwrap();
        let mut short = packet(9, 8);
        short[4] = 6;
        let actions = session.feed(&short).unwrap();
        assert!(matches!(
            &actions[..],
            [CaptureAction::Fail(DeviceError::SizeMismatch { expected: 8, actual: 6 })]
        ));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn test_retry_exhaustion() {
        let mut session = CaptureSession::new(768, 2, 1024).unwrap();
        assert!(session.start_capture().is_ok());
        assert!(session.start_capture().is_ok());
        assert!(matches!(
            session.start_capture(),
            Err(DeviceError::RetryExhausted { attempts: 2 })
        ));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut session = CaptureSession::new(8, 5, 1024).unwrap();
        session.start_capture().unwrap();
        session.feed(&ready_signal(16)).unwrap();
        session.feed(&packet(1, 8)[..10]).unwrap();
        assert!(session.buffered_bytes() > 0);

        session.reset_capture_state();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.buffered_bytes(), 0);
        session.reset_capture_state();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.buffered_bytes(), 0);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(matches!(
            CaptureSession::new(0, 5, 1024),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            CaptureSession::new(70_000, 5, 1 << 20),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            CaptureSession::new(768, 5, 770),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(CaptureSession::new(u16::MAX as usize, 5, 1 << 20).is_ok());
    }

    #[test]
    fn test_oversized_snapshot_refused() {
        let mut session = CaptureSession::new(768, 5, 64 * 1024)
            .unwrap()
            .with_max_image_size(1 << 20);
        session.start_capture().unwrap();

        let actions = session.feed(&ready_signal(u32::MAX)).unwrap();
        assert!(matches!(
            &actions[..],
            [CaptureAction::Fail(DeviceError::InvalidResponse(_))]
        ));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.snapshot_size(), 0);
        assert_eq!(session.buffered_bytes(), 0);
    }

    #[test]
    fn test_overflow_resets_transfer() {
        let mut session = CaptureSession::new(16, 5, 32).unwrap();
        session.start_capture().unwrap();
        session.feed(&ready_signal(64)).unwrap();
        assert_eq!(session.state(), CaptureState::AwaitingPacket);

        assert!(matches!(
            session.feed(&[0u8; 40]),
            Err(DeviceError::BufferOverflow { limit: 32 })
        ));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.buffered_bytes(), 0);
    }
}
