//! Solar charge controller
//!
//! Modbus-RTU style input-register reads over RS-485. Values are fixed
//! point (÷100) and 32-bit quantities are sent low word first.

mod engine;
pub mod registers;
pub mod telemetry;

pub use engine::{ChargerEngine, PollReport};
pub use registers::{RegisterBlock, RegisterGroup, ResponseAssembler};
pub use telemetry::{ChargerField, ChargerSnapshot, Reading};
