//! Spinel serial camera
//!
//! A snapshot command makes the camera answer with a ready signal carrying
//! the image size; the image is then read packet by packet by address, the
//! last packet being shorter than the rest.

mod engine;
pub mod session;
pub mod store;
pub mod wire;

pub use engine::CameraEngine;
pub use session::{CaptureAction, CaptureSession, CaptureState};
pub use store::{capture_filename, CaptureRecord, DirectoryStore, ImageStore};
