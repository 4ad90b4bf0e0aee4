//! Shared serial protocol plumbing
//!
//! CRC16-MODBUS, the receive-side byte accumulator, the error taxonomy and
//! serial port handling used by all three device engines.

pub mod accumulator;
pub mod crc;
mod error;
pub mod serial;

pub use accumulator::ByteAccumulator;
pub use crc::{crc16, crc16_le_bytes, verify_trailer_le};
pub use error::{DeviceError, ErrorKind};
pub use serial::{list_ports, open_link, open_port, BoxedLink, PortInfo, SerialConfig, SerialLink};

/// Default baud rate for every station serial link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default hard cap on buffered receive bytes per link
pub const DEFAULT_MAX_BUFFERED: usize = 64 * 1024;

/// Read chunk size used by the engines' receive loops
pub(crate) const READ_CHUNK_SIZE: usize = 1024;
