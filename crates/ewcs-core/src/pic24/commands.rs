//! PIC24 commands
//!
//! Command codes, output channel subcodes and schedule payloads understood by
//! the power/uplink controller.

use serde::{Deserialize, Serialize};

use crate::protocol::DeviceError;

use super::frame::MAX_DATA_LEN;

/// Requests sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Reset the controller (0x01)
    Reset,
    /// Switch an output channel (0x02)
    OutputControl,
    /// Request synchronized time data (0x03)
    SyncData,
    /// Toggle power-save mode (0x04)
    PowerSave,
    /// Start a satellite transmission (0x05)
    SatelliteTx,
    /// Store a schedule (0x06)
    SetSchedule,
    /// Read back a schedule (0x07)
    GetSchedule,
}

impl Command {
    /// Wire code
    pub fn code(&self) -> u8 {
        match self {
            Command::Reset => 0x01,
            Command::OutputControl => 0x02,
            Command::SyncData => 0x03,
            Command::PowerSave => 0x04,
            Command::SatelliteTx => 0x05,
            Command::SetSchedule => 0x06,
            Command::GetSchedule => 0x07,
        }
    }
}

/// Positive acknowledgement
pub const ACK: u8 = 0xA0;
/// Negative acknowledgement
pub const NACK: u8 = 0xA1;
/// Data reply
pub const DATA: u8 = 0xA2;

/// Whether `cmd` is one of the controller's reply codes
pub fn is_response_code(cmd: u8) -> bool {
    matches!(cmd, ACK | NACK | DATA)
}

/// Number of switchable output channels
pub const OUTPUT_CHANNELS: u8 = 4;

/// Subcode for switching `channel` (1-based) on or off.
///
/// Channel N uses `0xN0` for on and `0xN1` for off.
pub fn output_subcode(channel: u8, on: bool) -> Result<u8, DeviceError> {
    if channel == 0 || channel > OUTPUT_CHANNELS {
        return Err(DeviceError::InvalidArgument(format!(
            "unknown output channel {} (expected 1-{})",
            channel, OUTPUT_CHANNELS
        )));
    }
    Ok((channel << 4) | if on { 0x00 } else { 0x01 })
}

/// Which schedule a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTarget {
    /// Peripheral on/off cycle
    OnOff,
    /// Satellite uplink window
    Satellite,
}

impl ScheduleTarget {
    /// Selector byte leading every schedule payload
    pub fn code(&self) -> u8 {
        match self {
            ScheduleTarget::OnOff => 0x01,
            ScheduleTarget::Satellite => 0x02,
        }
    }
}

/// Schedule encoding spoken by the attached firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFormat {
    /// Opaque ASCII command string
    #[default]
    Text,
    /// Mode / on-minute / off-minute record
    Binary,
}

/// Structured schedule record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// 0 = disabled, 1 = hourly, 2 = continuous
    pub mode: u8,
    /// Minute of the hour the target is switched on
    pub on_minute: u8,
    /// Minute of the hour the target is switched off
    pub off_minute: u8,
}

impl Schedule {
    /// Highest mode value the firmware accepts
    pub const MAX_MODE: u8 = 2;

    /// Reject out-of-range fields
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.mode > Self::MAX_MODE {
            return Err(DeviceError::InvalidArgument(format!(
                "schedule mode {} out of range",
                self.mode
            )));
        }
        if self.on_minute >= 60 || self.off_minute >= 60 {
            return Err(DeviceError::InvalidArgument(format!(
                "schedule minutes {}/{} out of range",
                self.on_minute, self.off_minute
            )));
        }
        Ok(())
    }
}

/// Schedule body in either firmware encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePayload {
    /// Opaque command string (text firmware)
    Command(String),
    /// Structured record (binary firmware)
    Record(Schedule),
}

impl SchedulePayload {
    /// Encoding this payload belongs to
    pub fn format(&self) -> ScheduleFormat {
        match self {
            SchedulePayload::Command(_) => ScheduleFormat::Text,
            SchedulePayload::Record(_) => ScheduleFormat::Binary,
        }
    }

    /// Build the `set schedule` data section: target byte then body
    pub fn encode(
        &self,
        target: ScheduleTarget,
        format: ScheduleFormat,
    ) -> Result<Vec<u8>, DeviceError> {
        if self.format() != format {
            return Err(DeviceError::InvalidArgument(format!(
                "{:?} schedule payload sent to {:?} firmware",
                self.format(),
                format
            )));
        }
        let mut data = vec![target.code()];
        match self {
            SchedulePayload::Command(text) => {
                if !text.is_ascii() || text.len() > MAX_DATA_LEN - 1 {
                    return Err(DeviceError::InvalidArgument(format!(
                        "schedule command must be ASCII and at most {} bytes",
                        MAX_DATA_LEN - 1
                    )));
                }
                data.extend_from_slice(text.as_bytes());
            }
            SchedulePayload::Record(schedule) => {
                schedule.validate()?;
                data.extend_from_slice(&[schedule.mode, schedule.on_minute, schedule.off_minute]);
            }
        }
        Ok(data)
    }

    /// Decode a `get schedule` reply body.
    ///
    /// A leading target byte, when echoed by the firmware, is skipped. A
    /// bare 3-byte binary record is taken as-is since its mode byte may equal
    /// the target code.
    pub fn decode(
        target: ScheduleTarget,
        format: ScheduleFormat,
        data: &[u8],
    ) -> Result<Self, DeviceError> {
        let echoed = data.first() == Some(&target.code());
        let body = match format {
            ScheduleFormat::Text if echoed => &data[1..],
            ScheduleFormat::Binary if echoed && data.len() != 3 => &data[1..],
            _ => data,
        };
        match format {
            ScheduleFormat::Text => Ok(SchedulePayload::Command(
                String::from_utf8_lossy(body).trim_end_matches('\0').to_string(),
            )),
            ScheduleFormat::Binary => match body {
                [mode, on_minute, off_minute] => Ok(SchedulePayload::Record(Schedule {
                    mode: *mode,
                    on_minute: *on_minute,
                    off_minute: *off_minute,
                })),
                _ => Err(DeviceError::InvalidResponse(format!(
                    "binary schedule reply of {} bytes",
                    body.len()
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_subcodes() {
        assert_eq!(output_subcode(1, true).unwrap(), 0x10);
        assert_eq!(output_subcode(1, false).unwrap(), 0x11);
        assert_eq!(output_subcode(4, true).unwrap(), 0x40);
        assert_eq!(output_subcode(4, false).unwrap(), 0x41);
        assert!(output_subcode(0, true).is_err());
        assert!(output_subcode(5, false).is_err());
    }

    #[test]
    fn test_record_encoding() {
        let payload = SchedulePayload::Record(Schedule {
            mode: 1,
            on_minute: 10,
            off_minute: 50,
        });
        let data = payload
            .encode(ScheduleTarget::Satellite, ScheduleFormat::Binary)
            .unwrap();
        assert_eq!(data, vec![0x02, 1, 10, 50]);
    }

    #[test]
    fn test_format_selector_enforced() {
        let payload = SchedulePayload::Command("ON 10 OFF 50".into());
        assert!(payload
            .encode(ScheduleTarget::OnOff, ScheduleFormat::Binary)
            .is_err());
        let data = payload
            .encode(ScheduleTarget::OnOff, ScheduleFormat::Text)
            .unwrap();
        assert_eq!(&data[1..], b"ON 10 OFF 50");
    }

    #[test]
    fn test_out_of_range_record_rejected() {
        let payload = SchedulePayload::Record(Schedule {
            mode: 1,
            on_minute: 60,
            off_minute: 0,
        });
        assert!(matches!(
            payload.encode(ScheduleTarget::OnOff, ScheduleFormat::Binary),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decode_both_formats() {
        let record =
            SchedulePayload::decode(ScheduleTarget::OnOff, ScheduleFormat::Binary, &[0x01, 2, 0, 30])
                .unwrap();
        assert_eq!(
            record,
            SchedulePayload::Record(Schedule {
                mode: 2,
                on_minute: 0,
                off_minute: 30
            })
        );
        let text =
            SchedulePayload::decode(ScheduleTarget::Satellite, ScheduleFormat::Text, b"\x02SAT 05")
                .unwrap();
        assert_eq!(text, SchedulePayload::Command("SAT 05".into()));
    }

    #[test]
    fn test_text_echo_stripped_at_any_length() {
        for reply in [&b"\x01ON"[..], &b"\x01ONX"[..], &b"\x01O"[..]] {
            let decoded =
                SchedulePayload::decode(ScheduleTarget::OnOff, ScheduleFormat::Text, reply).unwrap();
            assert_eq!(
                decoded,
                SchedulePayload::Command(String::from_utf8_lossy(&reply[1..]).into_owned())
            );
        }
    }

    #[test]
    fn test_bare_binary_record_keeps_first_byte() {
        let record =
            SchedulePayload::decode(ScheduleTarget::OnOff, ScheduleFormat::Binary, &[0x01, 5, 55])
                .unwrap();
        assert_eq!(
            record,
            SchedulePayload::Record(Schedule {
                mode: 1,
                on_minute: 5,
                off_minute: 55
            })
        );
    }
}
