//! Charger engine
//!
//! Queries every register group in turn over an owned RS-485 link and folds
//! the decoded values into the telemetry snapshot.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::registers::{RegisterBlock, RegisterGroup, ResponseAssembler};
use super::telemetry::ChargerSnapshot;
use crate::config::ChargerConfig;
use crate::protocol::{DeviceError, ErrorKind, READ_CHUNK_SIZE};

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    /// Groups whose fields were refreshed
    pub updated: Vec<RegisterGroup>,
    /// Groups left at their previous values
    pub failed: Vec<(RegisterGroup, ErrorKind)>,
}

impl PollReport {
    /// Whether every group answered
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Register-query engine for the solar charge controller
pub struct ChargerEngine<T> {
    port: T,
    assembler: ResponseAssembler,
    snapshot: ChargerSnapshot,
    config: ChargerConfig,
}

impl<T> ChargerEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Take ownership of `port`
    pub fn new(port: T, config: ChargerConfig) -> Self {
        Self {
            port,
            assembler: ResponseAssembler::new(config.max_buffered),
            snapshot: ChargerSnapshot::new(),
            config,
        }
    }

    /// Latest decoded values
    pub fn snapshot(&self) -> &ChargerSnapshot {
        &self.snapshot
    }

    /// Run one exchange for `group`
    pub async fn query(&mut self, group: RegisterGroup) -> Result<RegisterBlock, DeviceError> {
        self.assembler.clear();
        let request = group.request(self.config.slave_id);
        self.port
            .write_all(&request)
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;

        let deadline = Instant::now() + Duration::from_millis(self.config.response_timeout_ms);
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = match tokio::time::timeout_at(deadline, self.port.read(&mut buf)).await {
                Err(_) => {
                    tracing::warn!(
                        ?group,
                        buffered = self.assembler.buffered(),
                        "charger response timed out"
                    );
                    return Err(DeviceError::Timeout);
                }
                Ok(Ok(0)) => return Err(DeviceError::Transport("charger link closed".into())),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(DeviceError::Transport(e.to_string())),
            };
            if let Some(frame) = self.assembler.push(&buf[..n])? {
                tracing::debug!(?group, len = frame.len(), "charger response");
                return RegisterBlock::parse(&frame, self.config.slave_id, group);
            }
        }
    }

    /// Query and decode one group into the snapshot
    pub async fn refresh(&mut self, group: RegisterGroup) -> Result<(), DeviceError> {
        let block = self.query(group).await?;
        let fields = group.decode(&block.registers())?;
        self.snapshot.apply(&fields, Utc::now());
        Ok(())
    }

    /// Query every group once.
    ///
    /// Request-level failures are reported per group; a transport failure
    /// ends the cycle and is returned.
    pub async fn poll(&mut self) -> Result<PollReport, DeviceError> {
        let delay = Duration::from_millis(self.config.inter_request_delay_ms);
        let mut report = PollReport::default();

        for (i, group) in RegisterGroup::POLL_ORDER.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            match self.refresh(group).await {
                Ok(()) => report.updated.push(group),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(?group, "charger query failed: {}", e);
                    report.failed.push((group, e.kind()));
                }
            }
        }
        Ok(report)
    }
}
