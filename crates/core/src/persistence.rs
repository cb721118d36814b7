//! Takeoff snapshots
//!
//! Saves and loads the full takeoff state (pages, conditions, measurements)
//! as a pretty-printed JSON sidecar next to the drawing set. Writes go
//! through a temporary file and a rename so a crash never leaves a
//! half-written snapshot behind.

use std::fs;
use std::path::{Path, PathBuf};

use crate::condition::Condition;
use crate::measurement::Measurement;
use crate::page::Page;

/// Snapshot layout version written by this crate
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Error types for persistence operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormat(u32),
}

impl PersistenceError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Serialized takeoff state
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TakeoffSnapshot {
    pub format_version: u32,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl Default for TakeoffSnapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            pages: Vec::new(),
            conditions: Vec::new(),
            measurements: Vec::new(),
        }
    }
}

/// Sidecar path for a drawing set
///
/// # Example
/// ```
/// use std::path::Path;
/// use takeoff_core::persistence::snapshot_path;
///
/// let path = snapshot_path(Path::new("/plans/tower-a.pdf"));
/// assert_eq!(path, Path::new("/plans/tower-a.pdf.takeoff.json"));
/// ```
pub fn snapshot_path(document_path: &Path) -> PathBuf {
    let mut path = document_path.as_os_str().to_owned();
    path.push(".takeoff.json");
    PathBuf::from(path)
}

/// Write a snapshot to `path` atomically
pub fn save_snapshot(snapshot: &TakeoffSnapshot, path: &Path) -> PersistenceResult<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json).map_err(|e| PersistenceError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

/// Read a snapshot from `path`
///
/// Returns `None` when no snapshot exists.
pub fn load_snapshot(path: &Path) -> PersistenceResult<Option<TakeoffSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
    let snapshot: TakeoffSnapshot = serde_json::from_str(&json)
        .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedFormat(snapshot.format_version));
    }
    Ok(Some(snapshot))
}
