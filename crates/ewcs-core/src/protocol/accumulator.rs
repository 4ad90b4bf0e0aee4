//! Byte-stream accumulator
//!
//! Collects partially delivered serial bytes until an engine recognizes a
//! complete frame. Extraction consumes a prefix which is never seen again.

use bytes::{Buf, BytesMut};

use super::{DeviceError, DEFAULT_MAX_BUFFERED};

/// Growable receive buffer with a hard size cap
#[derive(Debug)]
pub struct ByteAccumulator {
    buf: BytesMut,
    limit: usize,
}

impl ByteAccumulator {
    /// Create an accumulator with the default cap
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_BUFFERED)
    }

    /// Create an accumulator holding at most `limit` unconsumed bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(4096)),
            limit,
        }
    }

    /// Append newly arrived bytes.
    ///
    /// Exceeding the cap clears the buffer and reports a transport fault.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), DeviceError> {
        if self.buf.len() + chunk.len() > self.limit {
            self.buf.clear();
            return Err(DeviceError::BufferOverflow { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether at least `n` unconsumed bytes are available
    pub fn has(&self, n: usize) -> bool {
        self.buf.len() >= n
    }

    /// View the unconsumed bytes
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Remove and return the first `n` bytes, or `None` if not yet buffered
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if !self.has(n) {
            return None;
        }
        Some(self.buf.split_to(n).to_vec())
    }

    /// Drop the first `n` bytes (or everything if fewer are buffered)
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Drain every buffered byte
    pub fn drain_all(&mut self) -> Vec<u8> {
        self.buf.split().to_vec()
    }

    /// Position of the first occurrence of `marker`
    pub fn find(&self, marker: &[u8]) -> Option<usize> {
        if marker.is_empty() || self.buf.len() < marker.len() {
            return None;
        }
        self.buf.windows(marker.len()).position(|w| w == marker)
    }

    /// Discard bytes preceding `marker`.
    ///
    /// Returns true when the buffer now starts with the marker. When the
    /// marker is absent, everything except a possible partial marker at the
    /// tail is dropped.
    pub fn sync_to(&mut self, marker: &[u8]) -> bool {
        match self.find(marker) {
            Some(pos) => {
                self.discard(pos);
                true
            }
            None => {
                let keep = marker.len().saturating_sub(1).min(self.buf.len());
                let drop = self.buf.len() - keep;
                self.discard(drop);
                false
            }
        }
    }

    /// Forget all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_prefix() {
        let mut acc = ByteAccumulator::new();
        acc.extend(&[1, 2, 3]).unwrap();
        assert!(acc.take(4).is_none());
        acc.extend(&[4, 5]).unwrap();
        assert_eq!(acc.take(4), Some(vec![1, 2, 3, 4]));
        assert_eq!(acc.peek(), &[5]);
    }

    #[test]
    fn test_overflow_clears_buffer() {
        let mut acc = ByteAccumulator::with_limit(4);
        acc.extend(&[1, 2, 3]).unwrap();
        let err = acc.extend(&[4, 5]).unwrap_err();
        assert!(matches!(err, DeviceError::BufferOverflow { limit: 4 }));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_sync_to_marker() {
        let mut acc = ByteAccumulator::new();
        acc.extend(&[0x00, 0x11, 0x90, 0xEB, 0x01, 0x49, 0x07]).unwrap();
        assert!(acc.sync_to(&[0x90, 0xEB, 0x01, 0x49]));
        assert_eq!(acc.peek(), &[0x90, 0xEB, 0x01, 0x49, 0x07]);
    }

    #[test]
    fn test_sync_keeps_partial_marker_tail() {
        let mut acc = ByteAccumulator::new();
        acc.extend(&[0x00, 0x00, 0x00, 0x90, 0xEB]).unwrap();
        assert!(!acc.sync_to(&[0x90, 0xEB, 0x01, 0x49]));
        assert_eq!(acc.peek(), &[0x00, 0x90, 0xEB]);
        acc.extend(&[0x01, 0x49]).unwrap();
        assert!(acc.sync_to(&[0x90, 0xEB, 0x01, 0x49]));
        assert_eq!(acc.len(), 4);
    }
}
