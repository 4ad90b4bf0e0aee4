//! Charger register map and Modbus framing
//!
//! Request: `slave | 0x04 | addrHi | addrLo | countHi | countLo | crcLo | crcHi`
//! Response: `slave | 0x04 | byteCount | data[byteCount] | crcLo | crcHi`
//!
//! Registers are big-endian 16-bit words. 32-bit quantities span two
//! registers with the FIRST register holding the low word.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::telemetry::ChargerField;
use crate::protocol::{crc16_le_bytes, verify_trailer_le, ByteAccumulator, DeviceError};

/// Read input registers
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;
/// Set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 2;
const EXCEPTION_LEN: usize = 5;

/// Register groups read in one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterGroup {
    /// PV array voltage, current and power (plus battery and load mirrors)
    ArrayData,
    /// Load voltage, current and power
    LoadData,
    /// Battery and controller temperatures
    Temperatures,
    /// Battery state of charge
    BatterySoc,
    /// Battery rated voltage
    BatteryRatedVoltage,
    /// Battery, charging and discharging status words
    StatusFlags,
    /// Consumed and generated energy counters
    EnergyCounters,
    /// Real-time battery voltage and current
    BatteryRealtime,
}

impl RegisterGroup {
    /// Order in which a poll cycle queries the groups
    pub const POLL_ORDER: [RegisterGroup; 8] = [
        RegisterGroup::ArrayData,
        RegisterGroup::LoadData,
        RegisterGroup::Temperatures,
        RegisterGroup::BatterySoc,
        RegisterGroup::BatteryRatedVoltage,
        RegisterGroup::StatusFlags,
        RegisterGroup::EnergyCounters,
        RegisterGroup::BatteryRealtime,
    ];

    /// First register address
    pub fn start_address(&self) -> u16 {
        match self {
            RegisterGroup::ArrayData => 0x3100,
            RegisterGroup::LoadData => 0x310C,
            RegisterGroup::Temperatures => 0x3110,
            RegisterGroup::BatterySoc => 0x311A,
            RegisterGroup::BatteryRatedVoltage => 0x311D,
            RegisterGroup::StatusFlags => 0x3200,
            RegisterGroup::EnergyCounters => 0x3304,
            RegisterGroup::BatteryRealtime => 0x331A,
        }
    }

    /// Number of registers read
    pub fn register_count(&self) -> u16 {
        match self {
            RegisterGroup::ArrayData => 18,
            RegisterGroup::LoadData => 4,
            RegisterGroup::Temperatures => 2,
            RegisterGroup::BatterySoc => 1,
            RegisterGroup::BatteryRatedVoltage => 1,
            RegisterGroup::StatusFlags => 3,
            RegisterGroup::EnergyCounters => 16,
            RegisterGroup::BatteryRealtime => 3,
        }
    }

    /// Read request for this group
    pub fn request(&self, slave_id: u8) -> [u8; 8] {
        read_request(slave_id, self.start_address(), self.register_count())
    }

    /// Turn the group's registers into scaled fields
    pub fn decode(&self, regs: &[u16]) -> Result<Vec<(ChargerField, f64)>, DeviceError> {
        if regs.len() < self.register_count() as usize {
            return Err(DeviceError::InvalidResponse(format!(
                "{:?}: {} registers, expected {}",
                self,
                regs.len(),
                self.register_count()
            )));
        }
        use ChargerField::*;
        let fields = match self {
            RegisterGroup::ArrayData => vec![
                (PvVoltage, scaled(regs[0])),
                (PvCurrent, scaled(regs[1])),
                (PvPower, scaled_u32(regs[2], regs[3])),
            ],
            RegisterGroup::LoadData => vec![
                (LoadVoltage, scaled(regs[0])),
                (LoadCurrent, scaled(regs[1])),
                (LoadPower, scaled_u32(regs[2], regs[3])),
            ],
            RegisterGroup::Temperatures => vec![
                (BatteryTemperature, regs[0] as i16 as f64 / 100.0),
                (DeviceTemperature, regs[1] as i16 as f64 / 100.0),
            ],
            RegisterGroup::BatterySoc => vec![(BatterySoc, regs[0] as f64)],
            RegisterGroup::BatteryRatedVoltage => vec![(BatteryRatedVoltage, scaled(regs[0]))],
            RegisterGroup::StatusFlags => vec![
                (BatteryStatus, regs[0] as f64),
                (ChargingStatus, regs[1] as f64),
                (DischargingStatus, regs[2] as f64),
            ],
            RegisterGroup::EnergyCounters => {
                let counters = [
                    ConsumedEnergyToday,
                    ConsumedEnergyMonth,
                    ConsumedEnergyYear,
                    ConsumedEnergyTotal,
                    GeneratedEnergyToday,
                    GeneratedEnergyMonth,
                    GeneratedEnergyYear,
                    GeneratedEnergyTotal,
                ];
                counters
                    .iter()
                    .zip(regs.chunks_exact(2))
                    .map(|(&field, pair)| (field, scaled_u32(pair[0], pair[1])))
                    .collect()
            }
            RegisterGroup::BatteryRealtime => vec![
                (BatteryVoltage, scaled(regs[0])),
                (BatteryCurrent, low_first_u32(regs[1], regs[2]) as i32 as f64 / 100.0),
            ],
        };
        Ok(fields)
    }
}

/// Combine two registers, first one being the low word
pub fn low_first_u32(low: u16, high: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

fn scaled(reg: u16) -> f64 {
    reg as f64 / 100.0
}

fn scaled_u32(low: u16, high: u16) -> f64 {
    low_first_u32(low, high) as f64 / 100.0
}

/// Build a read-input-registers request with its CRC trailer
pub fn read_request(slave_id: u8, start_address: u16, count: u16) -> [u8; 8] {
    let mut req = [0u8; 8];
    req[0] = slave_id;
    req[1] = FN_READ_INPUT_REGISTERS;
    BigEndian::write_u16(&mut req[2..4], start_address);
    BigEndian::write_u16(&mut req[4..6], count);
    let crc = crc16_le_bytes(&req[..6]);
    req[6..].copy_from_slice(&crc);
    req
}

/// A validated register read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    /// Responding slave
    pub slave_id: u8,
    /// First register address requested
    pub start_address: u16,
    /// Registers requested
    pub register_count: u16,
    /// Complete response frame
    pub raw_bytes: Vec<u8>,
    /// Trailer matched
    pub crc_valid: bool,
}

impl RegisterBlock {
    /// Validate `frame` as the answer to `group` from `slave_id`
    pub fn parse(frame: &[u8], slave_id: u8, group: RegisterGroup) -> Result<Self, DeviceError> {
        if frame.len() < EXCEPTION_LEN {
            return Err(DeviceError::InvalidResponse(format!(
                "{} byte charger response",
                frame.len()
            )));
        }
        if let Err((expected, actual)) = verify_trailer_le(frame) {
            return Err(DeviceError::CrcMismatch { expected, actual });
        }
        if frame[0] != slave_id {
            return Err(DeviceError::InvalidResponse(format!(
                "reply from slave {} while talking to {}",
                frame[0], slave_id
            )));
        }
        if frame[1] == FN_READ_INPUT_REGISTERS | EXCEPTION_FLAG {
            return Err(DeviceError::ModbusException {
                function: FN_READ_INPUT_REGISTERS,
                code: frame[2],
            });
        }
        if frame[1] != FN_READ_INPUT_REGISTERS {
            return Err(DeviceError::InvalidResponse(format!(
                "unexpected function code {:#04x}",
                frame[1]
            )));
        }
        let expected_bytes = group.register_count() as usize * 2;
        if frame[2] as usize != expected_bytes {
            return Err(DeviceError::InvalidResponse(format!(
                "{:?}: {} data bytes, expected {}",
                group, frame[2], expected_bytes
            )));
        }
        Ok(Self {
            slave_id,
            start_address: group.start_address(),
            register_count: group.register_count(),
            raw_bytes: frame.to_vec(),
            crc_valid: true,
        })
    }

    /// Data section as big-endian registers
    pub fn registers(&self) -> Vec<u16> {
        let data = &self.raw_bytes[HEADER_LEN..self.raw_bytes.len() - CRC_LEN];
        data.chunks_exact(2).map(BigEndian::read_u16).collect()
    }
}

/// Reassembles a length-prefixed response from arbitrary chunks
#[derive(Debug)]
pub struct ResponseAssembler {
    rx: ByteAccumulator,
}

impl ResponseAssembler {
    /// Create an assembler holding at most `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            rx: ByteAccumulator::with_limit(limit),
        }
    }

    /// Full frame length once the header is known
    fn expected_len(&self) -> Option<usize> {
        let buf = self.rx.peek();
        if buf.len() >= 2 && buf[1] & EXCEPTION_FLAG != 0 {
            return Some(EXCEPTION_LEN);
        }
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(HEADER_LEN + buf[2] as usize + CRC_LEN)
    }

    /// Add bytes; returns a frame once the declared length is buffered
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, DeviceError> {
        self.rx.extend(chunk)?;
        match self.expected_len() {
            Some(len) => Ok(self.rx.take(len)),
            None => Ok(None),
        }
    }

    /// Drop leftovers before a new request
    pub fn clear(&mut self) {
        self.rx.clear();
    }

    /// Bytes buffered so far
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }
}
