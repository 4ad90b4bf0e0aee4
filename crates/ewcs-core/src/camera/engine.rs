//! Camera engine
//!
//! Drives a [`CaptureSession`] over an owned serial link: writes the
//! commands it asks for, applies the ready, packet and capture-wide
//! deadlines, and stores the finished image.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::session::{CaptureAction, CaptureSession, CaptureState};
use super::store::{capture_filename, CaptureRecord, ImageStore};
use crate::config::CameraConfig;
use crate::protocol::{DeviceError, READ_CHUNK_SIZE};

/// Image-transfer engine for the Spinel camera
pub struct CameraEngine<T> {
    port: T,
    session: CaptureSession,
    store: Arc<dyn ImageStore>,
    config: CameraConfig,
}

impl<T> CameraEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Take ownership of `port`; fails on settings no transfer can satisfy
    pub fn new(
        port: T,
        config: CameraConfig,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        let session =
            CaptureSession::new(config.packet_size, config.max_retries, config.max_buffered)?
                .with_max_image_size(config.max_image_size);
        Ok(Self {
            port,
            session,
            store,
            config,
        })
    }

    /// Current session (for status reporting)
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Abandon any transfer in progress
    pub fn reset_capture_state(&mut self) {
        self.session.reset_capture_state();
    }

    /// Capture, transfer and store one image
    pub async fn capture(&mut self) -> Result<CaptureRecord, DeviceError> {
        let timeout_ms = self.config.capture_timeout_ms;
        self.session.reset_retries();

        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.run_capture()).await {
            Ok(result) => {
                if result.is_err() {
                    self.session.reset_capture_state();
                }
                result
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms,
                    index = self.session.packet_index(),
                    "camera capture timed out"
                );
                self.session.reset_capture_state();
                Err(DeviceError::CaptureTimeout { timeout_ms })
            }
        }
    }

    async fn run_capture(&mut self) -> Result<CaptureRecord, DeviceError> {
        let ready_wait = Duration::from_millis(self.config.ready_timeout_ms);
        let packet_wait = Duration::from_millis(self.config.packet_timeout_ms);
        let mut buf = [0u8; READ_CHUNK_SIZE];

        let command = self.session.start_capture()?;
        self.write(&command).await?;
        let mut deadline = Instant::now() + ready_wait;

        loop {
            let read = tokio::time::timeout_at(deadline, self.port.read(&mut buf)).await;
            let n = match read {
                Err(_) if self.session.state() == CaptureState::AwaitingPacket => {
                    tracing::warn!(index = self.session.packet_index(), "camera packet timed out");
                    let request = self.session.retry_packet()?;
                    self.write(&request).await?;
                    deadline = Instant::now() + packet_wait;
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        attempt = self.session.retry_count(),
                        "no ready signal from camera"
                    );
                    let command = self.session.start_capture()?;
                    self.write(&command).await?;
                    deadline = Instant::now() + ready_wait;
                    continue;
                }
                Ok(Ok(0)) => return Err(DeviceError::Transport("camera link closed".into())),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(DeviceError::Transport(e.to_string())),
            };

            for action in self.session.feed(&buf[..n])? {
                match action {
                    CaptureAction::Send(request) => {
                        self.write(&request).await?;
                        deadline = Instant::now() + packet_wait;
                    }
                    CaptureAction::Complete(image) => return self.persist(image),
                    CaptureAction::Fail(e) => return Err(e),
                }
            }
        }
    }

    fn persist(&self, image: Vec<u8>) -> Result<CaptureRecord, DeviceError> {
        let timestamp = Utc::now();
        let filename = capture_filename(timestamp);
        self.store.save(&filename, &image)?;
        Ok(CaptureRecord {
            timestamp,
            filename,
            size: image.len(),
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.port
            .write_all(bytes)
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }
}
