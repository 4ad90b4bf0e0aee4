//! Serial port handling
//!
//! Opens the station's UART links as async streams and enumerates ports.

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{DeviceError, DEFAULT_BAUD_RATE};

/// Port path and speed for one serial link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/ttyAMA0" or "/dev/ttyUSB0")
    pub path: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Config for `path` at the default baud rate
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Any ordered byte stream an engine can own: a UART, a USB adapter, or an
/// in-memory pipe in tests
pub trait SerialLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialLink for T {}

/// Type-erased link used by the station facade
pub type BoxedLink = Box<dyn SerialLink>;

/// Information about an available serial port
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Port name
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Sort key: on-board UARTs first, then USB adapters, then anything else
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in ["ttyAMA", "ttyS", "ttyUSB", "ttyACM"].iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank as u8, num, basename.to_string());
        }
    }
    (u8::MAX, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a link as 8N1 without flow control, as every station device expects
pub fn open_port(config: &SerialConfig) -> Result<SerialStream, DeviceError> {
    tracing::info!(path = %config.path, baud = config.baud_rate, "opening serial link");
    tokio_serial::new(&config.path, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| DeviceError::Transport(format!("{}: {}", config.path, e)))
}

/// Open a link and erase its concrete type
pub fn open_link(config: &SerialConfig) -> Result<BoxedLink, DeviceError> {
    Ok(Box::new(open_port(config)?))
}
