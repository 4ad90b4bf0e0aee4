//! PIC24 power/uplink controller
//!
//! STX/ETX framed command/response protocol with sequence numbers and a
//! CRC16 trailer. The controller switches power rails, runs the satellite
//! uplink and keeps the on/off and satellite schedules.

pub mod commands;
mod engine;
pub mod frame;
mod pending;

pub use commands::{Command, Schedule, ScheduleFormat, SchedulePayload, ScheduleTarget};
pub use engine::{Pic24Engine, Pic24Event};
pub use frame::{Frame, FrameFault, FrameReceiver, RxState};
pub use pending::{PendingTable, RequestKey};

/// Default reply deadline in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 200;
