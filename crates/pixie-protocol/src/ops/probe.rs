//! Probe operation types.
//!
//! Probe is answered without touching the toolchain or hardware and is the
//! only operation accepted with protocol_version 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe request payload (typically empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeRequest {}

/// Probe response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// When this response was created.
    pub created_at: DateTime<Utc>,
    /// Lane version.
    pub lane_version: String,
    /// Minimum protocol version supported.
    pub protocol_min: i32,
    /// Maximum protocol version supported.
    pub protocol_max: i32,
    /// Supported operation names.
    pub operations: Vec<String>,
    /// The board this lane builds for.
    pub board: BoardInfo,
}

/// Target board description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Fully qualified board name passed to the compiler.
    pub fqbn: String,
    /// Chip identifier passed to the flasher.
    pub chip: String,
    /// Flash size the images are built for (e.g. "4MB").
    pub flash_size: String,
}
