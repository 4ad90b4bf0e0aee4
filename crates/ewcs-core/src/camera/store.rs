//! Captured image storage
//!
//! The camera engine hands finished buffers to an [`ImageStore`]; encoding
//! and indexing happen downstream.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::DeviceError;

/// A completed capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// When the image was assembled
    pub timestamp: DateTime<Utc>,
    /// Generated file name
    pub filename: String,
    /// Image size in bytes
    pub size: usize,
}

/// Destination for assembled images
pub trait ImageStore: Send + Sync {
    /// Persist `data` under `filename`
    fn save(&self, filename: &str, data: &[u8]) -> Result<PathBuf, DeviceError>;
}

/// File name for an image captured at `at`
pub fn capture_filename(at: DateTime<Utc>) -> String {
    format!("spinel_{}.jpg", at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Writes images into a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Store images under `dir`, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageStore for DirectoryStore {
    fn save(&self, filename: &str, data: &[u8]) -> Result<PathBuf, DeviceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, data)?;
        tracing::info!(path = %path.display(), bytes = data.len(), "image saved");
        Ok(path)
    }
}
