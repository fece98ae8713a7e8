//! Status operation types.
//!
//! The readiness probe: callers poll this before submitting compiles.

use serde::{Deserialize, Serialize};

/// Status request payload (empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {}

/// Toolchain readiness as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainStatus {
    Unchecked,
    Installing,
    Ready,
    Failed,
}

/// Status response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Current toolchain state.
    pub toolchain: ToolchainStatus,
    /// Convenience flag: true only when `toolchain` is ready.
    pub ready: bool,
    /// Failure reason when `toolchain` is failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
