//! Review operation types (advisory code check).

use serde::{Deserialize, Serialize};

/// Review request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Sketch source text to review.
    pub code: String,
    /// Optional reference solution to compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Optional task description the code is meant to satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

/// Review response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    /// Verdict. Always true when the advisor was unavailable.
    pub valid: bool,
    /// Free-text guidance.
    pub guidance: String,
    /// False when the verdict is a fallback rather than a real review.
    pub advisory_available: bool,
}
