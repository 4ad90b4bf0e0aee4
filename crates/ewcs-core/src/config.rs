//! Station configuration
//!
//! Per-link settings with defaults matching the deployed hardware. Every
//! field may be omitted from the JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::session::{check_packet_geometry, DEFAULT_MAX_IMAGE_SIZE};
use crate::pic24::{ScheduleFormat, DEFAULT_RESPONSE_TIMEOUT_MS};
use crate::protocol::{DeviceError, SerialConfig, DEFAULT_MAX_BUFFERED};

/// PIC24 controller link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pic24Config {
    /// Serial port
    pub port: SerialConfig,
    /// Reply deadline per request
    pub response_timeout_ms: u64,
    /// Schedule encoding of the installed firmware
    pub schedule_format: ScheduleFormat,
}

impl Default for Pic24Config {
    fn default() -> Self {
        Self {
            port: SerialConfig::new("/dev/ttyAMA2"),
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            schedule_format: ScheduleFormat::default(),
        }
    }
}

/// Spinel camera link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Serial port
    pub port: SerialConfig,
    /// Nominal payload bytes per image packet
    pub packet_size: usize,
    /// Snapshot attempts before giving up
    pub max_retries: u32,
    /// Wait for the ready signal after each snapshot command
    pub ready_timeout_ms: u64,
    /// Wait for each image packet
    pub packet_timeout_ms: u64,
    /// Deadline for a whole capture
    pub capture_timeout_ms: u64,
    /// Receive buffer cap
    pub max_buffered: usize,
    /// Largest snapshot size accepted from the camera
    pub max_image_size: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            port: SerialConfig::new("/dev/ttyAMA3"),
            packet_size: 768,
            max_retries: 5,
            ready_timeout_ms: 1500,
            packet_timeout_ms: 1000,
            capture_timeout_ms: 6000,
            max_buffered: DEFAULT_MAX_BUFFERED,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl CameraConfig {
    /// Reject settings the transfer cannot work with
    pub fn validate(&self) -> Result<(), DeviceError> {
        check_packet_geometry(self.packet_size, self.max_buffered)?;
        if self.max_image_size == 0 {
            return Err(DeviceError::InvalidArgument(
                "camera max_image_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Solar charge controller link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// Serial port (RS-485 adapter)
    pub port: SerialConfig,
    /// Modbus slave address
    pub slave_id: u8,
    /// Pause between register-group requests
    pub inter_request_delay_ms: u64,
    /// Reply deadline per register group
    pub response_timeout_ms: u64,
    /// Receive buffer cap
    pub max_buffered: usize,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            port: SerialConfig::new("/dev/ttyUSB0"),
            slave_id: 1,
            inter_request_delay_ms: 50,
            response_timeout_ms: 500,
            max_buffered: 1024,
        }
    }
}

/// Configuration for the whole station
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Station name reported with telemetry
    pub station_name: String,
    /// Directory captured images are written to
    pub image_dir: String,
    /// PIC24 controller
    pub pic24: Pic24Config,
    /// Spinel camera
    pub camera: CameraConfig,
    /// Solar charger
    pub charger: ChargerConfig,
}

impl StationConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, DeviceError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DeviceError::InvalidArgument(format!("invalid station config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), DeviceError> {
        self.camera.validate()
    }

    /// Load a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}
