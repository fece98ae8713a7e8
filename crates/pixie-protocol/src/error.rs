//! Error types for the RPC protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation. The first group covers
/// envelope problems; the rest mirror the build/flash failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// Caller input rejected before any work was done (e.g. empty source).
    ValidationError,
    /// The compiler toolchain is still installing or failed to install.
    ToolchainNotReady,
    /// The compiler rejected the source.
    CompilationError,
    /// A compile or flash subprocess exceeded its wall-clock limit.
    Timeout,
    /// The compiler succeeded but produced no usable binary.
    NoArtifacts,
    /// No known target device is attached.
    DeviceNotFound,
    /// The flasher reported a failure.
    FlashError,
    /// Unexpected server-side failure.
    Internal,
}

impl ErrorCode {
    /// Stable string form, identical to the serialized value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ToolchainNotReady => "TOOLCHAIN_NOT_READY",
            Self::CompilationError => "COMPILATION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NoArtifacts => "NO_ARTIFACTS",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::FlashError => "FLASH_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether re-sending the same request may succeed later.
    ///
    /// Flash failures count as retryable: most of them clear after a
    /// physical action such as holding the boot button.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ToolchainNotReady | Self::Timeout | Self::DeviceNotFound | Self::FlashError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable error message. Subprocess diagnostics are carried
    /// verbatim, so this may span multiple lines.
    pub message: String,
    /// Whether the caller may retry without changing its input.
    pub retryable: bool,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            data: None,
        }
    }

    /// Create a new RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(code, message)
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create an INTERNAL error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
