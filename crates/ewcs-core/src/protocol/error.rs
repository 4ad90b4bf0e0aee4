//! Protocol errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while talking to a station device
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Port closed or failed
    #[error("Serial transport error: {0}")]
    Transport(String),

    /// No reply before the deadline
    #[error("Response timeout")]
    Timeout,

    /// Checksum did not match
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// Computed over the received bytes
        expected: u16,
        /// Carried in the trailer
        actual: u16,
    },

    /// Camera retries used up
    #[error("Capture aborted after {attempts} attempts without a ready signal")]
    RetryExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Assembled image length differs from the announced size
    #[error("Image size mismatch: expected {expected} bytes, assembled {actual}")]
    SizeMismatch {
        /// Announced size
        expected: usize,
        /// Assembled size
        actual: usize,
    },

    /// Whole capture exceeded its deadline
    #[error("Capture did not complete within {timeout_ms}ms")]
    CaptureTimeout {
        /// Deadline that passed
        timeout_ms: u64,
    },

    /// Request rejected before sending
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Controller answered with NACK
    #[error("Device rejected command {cmd:#04x}")]
    Nack {
        /// Rejected command code
        cmd: u8,
    },

    /// Reply well-formed on the wire but not what was asked for
    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    /// Modbus exception reply
    #[error("Modbus exception {code:#04x} for function {function:#04x}")]
    ModbusException {
        /// Function that failed
        function: u8,
        /// Exception code
        code: u8,
    },

    /// Receive buffer cap exceeded
    #[error("Receive buffer overflow: more than {limit} bytes without a frame")]
    BufferOverflow {
        /// Configured cap
        limit: usize,
    },

    /// Local I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Stable error taxonomy handed to the layers above the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Port open/read/write failure; the link needs a reconnect
    TransportError,
    /// Frame corruption
    CrcMismatch,
    /// No response before the deadline
    Timeout,
    /// Camera never produced a ready signal
    RetryExhausted,
    /// Assembled image length differs from the announced size
    SizeMismatch,
    /// Capture exceeded its overall deadline
    CaptureTimeout,
    /// Request rejected before any byte was sent
    InvalidArgument,
    /// Device answered, but refused or garbled the request
    DeviceRejected,
}

impl DeviceError {
    /// Classify this error into the stable taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Transport(_) | DeviceError::IoError(_) | DeviceError::BufferOverflow { .. } => {
                ErrorKind::TransportError
            }
            DeviceError::Timeout => ErrorKind::Timeout,
            DeviceError::CrcMismatch { .. } => ErrorKind::CrcMismatch,
            DeviceError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            DeviceError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            DeviceError::CaptureTimeout { .. } => ErrorKind::CaptureTimeout,
            DeviceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DeviceError::Nack { .. }
            | DeviceError::InvalidResponse(_)
            | DeviceError::ModbusException { .. } => ErrorKind::DeviceRejected,
        }
    }

    /// Whether the engine must reconnect its port before further use
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::TransportError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_fatal() {
        assert!(DeviceError::Transport("port closed".into()).is_fatal());
        assert!(DeviceError::BufferOverflow { limit: 16 }.is_fatal());
        assert!(!DeviceError::Timeout.is_fatal());
        assert!(!DeviceError::CrcMismatch { expected: 1, actual: 2 }.is_fatal());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&DeviceError::Nack { cmd: 0x02 }.kind()).unwrap();
        assert_eq!(json, "\"device_rejected\"");
    }

    #[test]
    fn test_crc_mismatch_display() {
        let err = DeviceError::CrcMismatch {
            expected: 0x1234,
            actual: 0xabcd,
        };
        assert_eq!(err.to_string(), "CRC mismatch: expected 0x1234, got 0xabcd");
    }
}
