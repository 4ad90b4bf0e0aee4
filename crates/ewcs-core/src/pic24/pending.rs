//! Pending request table
//!
//! Maps `(response cmd, seq)` to a single-use completion slot. Whichever of
//! {matching frame, timeout} removes the entry first wins; the other side
//! finds nothing and becomes a no-op.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::commands::{ACK, DATA, NACK};
use super::frame::Frame;

/// Correlation key: expected response code and sequence number
pub type RequestKey = (u8, u8);

struct PendingSlot {
    tx: oneshot::Sender<Frame>,
    created_at: Instant,
    timeout: Duration,
}

/// Table of requests awaiting a reply
#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<RequestKey, PendingSlot>>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<RequestKey, PendingSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a completion slot for `key`
    pub fn register(&self, key: RequestKey, timeout: Duration) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let slot = PendingSlot {
            tx,
            created_at: Instant::now(),
            timeout,
        };
        if self.slots().insert(key, slot).is_some() {
            tracing::warn!(cmd = key.0, seq = key.1, "sequence reused while a request was still pending");
        }
        rx
    }

    /// Route `frame` to its waiting caller.
    ///
    /// NACK and DATA replies also answer a request registered under ACK with
    /// the same sequence. Returns the frame back when nobody is waiting,
    /// including a caller that timed out but has not cancelled yet.
    pub fn resolve(&self, frame: Frame) -> Result<(), Frame> {
        let slot = {
            let mut slots = self.slots();
            match slots.remove(&(frame.cmd, frame.seq)) {
                Some(slot) => Some(slot),
                None if matches!(frame.cmd, NACK | DATA) => slots.remove(&(ACK, frame.seq)),
                None => None,
            }
        };
        let Some(slot) = slot else {
            return Err(frame);
        };
        tracing::debug!(
            seq = frame.seq,
            elapsed_ms = slot.created_at.elapsed().as_millis() as u64,
            timeout_ms = slot.timeout.as_millis() as u64,
            "response matched"
        );
        slot.tx.send(frame).map_err(|frame| {
            tracing::debug!(seq = frame.seq, "caller stopped waiting before the response was delivered");
            frame
        })
    }

    /// Remove `key` after its deadline passed; false if a response got there first
    pub fn cancel(&self, key: RequestKey) -> bool {
        self.slots().remove(&key).is_some()
    }

    /// Drop every slot, failing all waiting callers
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Check if no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}
