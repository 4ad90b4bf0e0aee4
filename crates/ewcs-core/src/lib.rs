//! # EWCS Core Library
//!
//! Serial device protocol layer for the EWCS environmental monitoring station.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - CRC16-MODBUS framing utilities shared by every serial link
//! - The PIC24 power/uplink controller packet engine
//! - The Spinel serial camera image-transfer engine
//! - The solar charge controller register-query engine
//! - A station facade exposing device state as plain data
//!
//! ## Example
//!
//! ```rust,ignore
//! use ewcs_core::{config::StationConfig, pic24::Pic24Engine, protocol::serial};
//!
//! let config = StationConfig::from_file("ewcs.json")?;
//! let port = serial::open_port(&config.pic24.port)?;
//! let pic24 = Pic24Engine::spawn(port, config.pic24.clone());
//!
//! pic24.set_output(2, true).await?;
//! ```

pub mod camera;
pub mod charger;
pub mod config;
pub mod pic24;
pub mod protocol;
pub mod station;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::camera::{CameraEngine, CaptureRecord, CaptureSession, CaptureState};
    pub use crate::charger::{ChargerEngine, ChargerField, ChargerSnapshot, RegisterGroup};
    pub use crate::config::StationConfig;
    pub use crate::pic24::{Frame, Pic24Engine, Schedule, ScheduleFormat, SchedulePayload};
    pub use crate::protocol::{crc16, DeviceError, ErrorKind};
    pub use crate::station::{FailureResponse, Station};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
