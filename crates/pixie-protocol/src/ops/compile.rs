//! Compile operation types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifacts keyed by wire name (`merged`, `bootloader`, `partitions`,
/// `application`).
pub type ArtifactMap = BTreeMap<String, ArtifactPayload>;

/// Compile request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Sketch source text.
    pub code: String,
}

/// One binary artifact as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPayload {
    /// Standard base64 of the raw image bytes.
    pub payload_base64: String,
    /// Flash address as lowercase hex with a `0x` prefix (e.g. "0x8000").
    pub offset_hex: String,
    /// SHA-256 hex digest of the raw bytes. Optional on input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Compile response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Identifier of the compile job (also the sketch name).
    pub job_id: String,
    /// Human-readable summary.
    pub message: String,
    /// Produced artifacts.
    pub artifacts: ArtifactMap,
    /// Wall-clock duration of the compile in milliseconds.
    pub duration_ms: u64,
    /// When the compile finished.
    pub completed_at: DateTime<Utc>,
}
