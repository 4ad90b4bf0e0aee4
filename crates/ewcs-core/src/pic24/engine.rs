//! PIC24 packet engine
//!
//! Owns one serial link to the power/uplink controller. Sends are
//! correlated to replies by `(response code, seq)` so callers may run
//! concurrently; a single reader task feeds the receive state machine.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use super::commands::{
    is_response_code, output_subcode, Command, ScheduleTarget, SchedulePayload, ACK, NACK,
};
use super::frame::{Frame, FrameReceiver};
use super::pending::PendingTable;
use crate::config::Pic24Config;
use crate::protocol::{DeviceError, READ_CHUNK_SIZE};

/// Capacity of the unsolicited-frame observer channel
const EVENT_CAPACITY: usize = 32;

/// Notifications published by the reader task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pic24Event {
    /// A valid frame nobody was waiting for (including late replies)
    Unsolicited(Frame),
    /// The link closed or failed; the engine must be recreated
    Disconnected,
}

struct Shared {
    pending: PendingTable,
    events: broadcast::Sender<Pic24Event>,
    connected: AtomicBool,
}

/// Command/response engine for the PIC24 controller
pub struct Pic24Engine<T> {
    writer: Mutex<WriteHalf<T>>,
    next_seq: AtomicU8,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    config: Pic24Config,
}

impl<T> Pic24Engine<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Take ownership of `port` and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(port: T, config: Pic24Config) -> Self {
        let (reader, writer) = tokio::io::split(port);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pending: PendingTable::new(),
            events,
            connected: AtomicBool::new(true),
        });
        let shutdown = CancellationToken::new();
        tokio::spawn(read_loop(reader, shared.clone(), shutdown.clone()));

        Self {
            writer: Mutex::new(writer),
            next_seq: AtomicU8::new(0),
            shared,
            shutdown,
            config,
        }
    }

    /// Observe unsolicited frames and link loss
    pub fn subscribe(&self) -> broadcast::Receiver<Pic24Event> {
        self.shared.events.subscribe()
    }

    /// Whether the reader task still has a live link
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Engine configuration
    pub fn config(&self) -> &Pic24Config {
        &self.config
    }

    /// Send a command frame.
    ///
    /// With `expect_response`, waits for the reply matched by sequence number
    /// and fails with [`DeviceError::Timeout`] once the configured deadline
    /// passes. A reply arriving after that is reported as unsolicited.
    pub async fn send(
        &self,
        cmd: u8,
        payload: Vec<u8>,
        expect_response: bool,
    ) -> Result<Option<Frame>, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::Transport("PIC24 link is closed".into()));
        }
        // Wraps at 255
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(seq, cmd, payload)?;
        let key = (ACK, seq);
        let timeout = Duration::from_millis(self.config.response_timeout_ms);

        let reply = expect_response.then(|| self.shared.pending.register(key, timeout));

        tracing::debug!(cmd, seq, len = frame.data.len(), "PIC24 send");
        if let Err(e) = self.write_frame(&frame).await {
            self.shared.pending.cancel(key);
            return Err(e);
        }

        let Some(reply) = reply else {
            return Ok(None);
        };
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(_)) => Err(DeviceError::Transport(
                "PIC24 link closed while awaiting a reply".into(),
            )),
            Err(_) => {
                self.shared.pending.cancel(key);
                tracing::warn!(cmd, seq, "PIC24 request timed out");
                Err(DeviceError::Timeout)
            }
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), DeviceError> {
        let bytes = frame.to_bytes();
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }

    /// Send `command` and wait for an ACK or DATA reply
    pub async fn request(&self, command: Command, payload: Vec<u8>) -> Result<Frame, DeviceError> {
        let reply = self
            .send(command.code(), payload, true)
            .await?
            .ok_or_else(|| DeviceError::InvalidResponse("missing reply".into()))?;
        if reply.cmd == NACK {
            return Err(DeviceError::Nack { cmd: command.code() });
        }
        Ok(reply)
    }

    /// Reset the controller
    pub async fn reset(&self) -> Result<(), DeviceError> {
        self.request(Command::Reset, Vec::new()).await.map(|_| ())
    }

    /// Switch output `channel` (1-4) on or off
    pub async fn set_output(&self, channel: u8, on: bool) -> Result<(), DeviceError> {
        let subcode = output_subcode(channel, on)?;
        self.request(Command::OutputControl, vec![subcode])
            .await
            .map(|_| ())
    }

    /// Request synchronized time data; returns the reply's data section
    pub async fn request_sync_data(&self) -> Result<Vec<u8>, DeviceError> {
        self.request(Command::SyncData, Vec::new())
            .await
            .map(|frame| frame.data)
    }

    /// Enable or disable power-save mode
    pub async fn set_power_save(&self, enabled: bool) -> Result<(), DeviceError> {
        self.request(Command::PowerSave, vec![enabled as u8])
            .await
            .map(|_| ())
    }

    /// Start a satellite transmission
    pub async fn start_satellite_tx(&self) -> Result<(), DeviceError> {
        self.request(Command::SatelliteTx, Vec::new())
            .await
            .map(|_| ())
    }

    /// Store a schedule in the encoding selected for this firmware
    pub async fn set_schedule(
        &self,
        target: ScheduleTarget,
        payload: &SchedulePayload,
    ) -> Result<(), DeviceError> {
        let data = payload.encode(target, self.config.schedule_format)?;
        self.request(Command::SetSchedule, data).await.map(|_| ())
    }

    /// Read back a schedule
    pub async fn get_schedule(&self, target: ScheduleTarget) -> Result<SchedulePayload, DeviceError> {
        let reply = self
            .request(Command::GetSchedule, vec![target.code()])
            .await?;
        SchedulePayload::decode(target, self.config.schedule_format, &reply.data)
    }
}

impl<T> Drop for Pic24Engine<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop<T: AsyncRead>(
    mut reader: ReadHalf<T>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let mut receiver = FrameReceiver::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => {
                tracing::info!("PIC24 link closed");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("PIC24 read failed: {}", e);
                break;
            }
        };

        for frame in receiver.feed(&buf[..n]) {
            if let Err(frame) = shared.pending.resolve(frame) {
                if is_response_code(frame.cmd) {
                    tracing::debug!(cmd = frame.cmd, seq = frame.seq, "unsolicited PIC24 reply");
                } else {
                    tracing::info!(cmd = frame.cmd, seq = frame.seq, "PIC24 frame without request");
                }
                // No subscribers is fine
                let _ = shared.events.send(Pic24Event::Unsolicited(frame));
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.pending.clear();
    let _ = shared.events.send(Pic24Event::Disconnected);
}
