//! PIC24 frame encoding and receive state machine
//!
//! Wire format:
//! - 1 byte: STX (0x02)
//! - 2 bytes: data length (big-endian, at most 64)
//! - 1 byte: sequence number
//! - 1 byte: total packets (always 1)
//! - 1 byte: command / response code
//! - N bytes: data
//! - 2 bytes: CRC16-MODBUS over length..data (big-endian)
//! - 1 byte: ETX (0x03)

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::{crc16, DeviceError};

/// Start-of-frame marker
pub const STX: u8 = 0x02;
/// End-of-frame marker
pub const ETX: u8 = 0x03;
/// Largest data section the controller accepts
pub const MAX_DATA_LEN: usize = 64;

/// A PIC24 protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number
    pub seq: u8,
    /// Total packets in this transfer
    pub total: u8,
    /// Command or response code
    pub cmd: u8,
    /// Data section
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a single-packet frame
    pub fn new(seq: u8, cmd: u8, data: Vec<u8>) -> Result<Self, DeviceError> {
        if data.len() > MAX_DATA_LEN {
            return Err(DeviceError::InvalidArgument(format!(
                "payload of {} bytes exceeds the {} byte frame limit",
                data.len(),
                MAX_DATA_LEN
            )));
        }
        Ok(Self {
            seq,
            total: 1,
            cmd,
            data,
        })
    }

    /// Declared data length
    pub fn length(&self) -> u16 {
        self.data.len() as u16
    }

    /// CRC16 over length, seq, total, cmd and data
    pub fn crc(&self) -> u16 {
        crc16(&self.checked_span())
    }

    fn checked_span(&self) -> Vec<u8> {
        let mut span = Vec::with_capacity(5 + self.data.len());
        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, self.length());
        span.extend_from_slice(&len);
        span.push(self.seq);
        span.push(self.total);
        span.push(self.cmd);
        span.extend_from_slice(&self.data);
        span
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let span = self.checked_span();
        let mut bytes = Vec::with_capacity(span.len() + 4);
        bytes.push(STX);
        bytes.extend_from_slice(&span);
        let mut crc = [0u8; 2];
        BigEndian::write_u16(&mut crc, crc16(&span));
        bytes.extend_from_slice(&crc);
        bytes.push(ETX);
        bytes
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        self.data.len() + 10
    }
}

/// Receive state, one per expected byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Scanning for STX
    WaitStx,
    /// Length, high byte
    ReadLenHi,
    /// Length, low byte
    ReadLenLo,
    /// Sequence number
    ReadSeq,
    /// Packet total
    ReadTotal,
    /// Command code
    ReadCmd,
    /// Data bytes
    ReadData,
    /// CRC, high byte
    ReadCrcHi,
    /// CRC, low byte
    ReadCrcLo,
    /// Expecting ETX
    WaitEtx,
}

/// Why a structurally started frame was thrown away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameFault {
    /// Declared length above [`MAX_DATA_LEN`]
    Oversize(u16),
    /// End marker missing
    BadTerminator(u8),
    /// Checksum did not match
    BadCrc {
        /// Computed over the received frame
        expected: u16,
        /// Carried in the trailer
        actual: u16,
    },
}

/// Byte-at-a-time frame reassembler
#[derive(Debug)]
pub struct FrameReceiver {
    state: RxState,
    length: u16,
    seq: u8,
    total: u8,
    cmd: u8,
    data: Vec<u8>,
    crc: u16,
}

impl FrameReceiver {
    /// Create a receiver waiting for STX
    pub fn new() -> Self {
        Self {
            state: RxState::WaitStx,
            length: 0,
            seq: 0,
            total: 0,
            cmd: 0,
            data: Vec::with_capacity(MAX_DATA_LEN),
            crc: 0,
        }
    }

    /// Current receive state
    pub fn state(&self) -> RxState {
        self.state
    }

    fn restart(&mut self) {
        self.state = RxState::WaitStx;
        self.length = 0;
        self.data.clear();
        self.crc = 0;
    }

    /// Advance the state machine by one byte.
    ///
    /// Returns a frame or a fault when a frame attempt ends on this byte.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameFault>> {
        match self.state {
            RxState::WaitStx => {
                if byte == STX {
                    self.restart();
                    self.state = RxState::ReadLenHi;
                }
            }
            RxState::ReadLenHi => {
                self.length = (byte as u16) << 8;
                self.state = RxState::ReadLenLo;
            }
            RxState::ReadLenLo => {
                self.length |= byte as u16;
                if self.length as usize > MAX_DATA_LEN {
                    let length = self.length;
                    self.restart();
                    return Some(Err(FrameFault::Oversize(length)));
                }
                self.state = RxState::ReadSeq;
            }
            RxState::ReadSeq => {
                self.seq = byte;
                self.state = RxState::ReadTotal;
            }
            RxState::ReadTotal => {
                self.total = byte;
                self.state = RxState::ReadCmd;
            }
            RxState::ReadCmd => {
                self.cmd = byte;
                self.state = if self.length == 0 {
                    RxState::ReadCrcHi
                } else {
                    RxState::ReadData
                };
            }
            RxState::ReadData => {
                self.data.push(byte);
                if self.data.len() == self.length as usize {
                    self.state = RxState::ReadCrcHi;
                }
            }
            RxState::ReadCrcHi => {
                self.crc = (byte as u16) << 8;
                self.state = RxState::ReadCrcLo;
            }
            RxState::ReadCrcLo => {
                self.crc |= byte as u16;
                self.state = RxState::WaitEtx;
            }
            RxState::WaitEtx => {
                let outcome = self.finish(byte);
                self.restart();
                return Some(outcome);
            }
        }
        None
    }

    fn finish(&mut self, terminator: u8) -> Result<Frame, FrameFault> {
        if terminator != ETX {
            return Err(FrameFault::BadTerminator(terminator));
        }
        let frame = Frame {
            seq: self.seq,
            total: self.total,
            cmd: self.cmd,
            data: std::mem::take(&mut self.data),
        };
        let expected = frame.crc();
        if expected != self.crc {
            return Err(FrameFault::BadCrc {
                expected,
                actual: self.crc,
            });
        }
        Ok(frame)
    }

    /// Feed a chunk and collect every valid frame it completes.
    ///
    /// Faulty frames are logged and dropped here; they never reach a caller.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            match self.push(byte) {
                Some(Ok(frame)) => frames.push(frame),
                Some(Err(fault)) => tracing::warn!(?fault, "dropping PIC24 frame"),
                None => {}
            }
        }
        frames
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}
