//! Flash operation types.

use serde::{Deserialize, Serialize};

use super::compile::ArtifactMap;

/// Flash request payload: the artifact map exactly as `compile` returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashRequest {
    pub artifacts: ArtifactMap,
}

/// Flash response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashResponse {
    /// Human-readable summary.
    pub message: String,
    /// Serial port the device was found on.
    pub port: String,
    /// Captured flasher stdout.
    pub device_log: String,
}
