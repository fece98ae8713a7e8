//! Error taxonomy shared by every lane operation.
//!
//! Each component has its own error enum; this module maps them onto the
//! stable [`ErrorKind`] codes and the wire [`RpcError`].

use pixie_protocol::RpcError;

use crate::artifact::ArtifactError;
use crate::build::BuildError;
use crate::flash::FlashError;

/// Stable failure kind. Same registry as the wire error codes.
pub use pixie_protocol::ErrorCode as ErrorKind;

impl From<&BuildError> for RpcError {
    fn from(e: &BuildError) -> Self {
        RpcError::new(e.kind(), e.to_string())
    }
}

impl From<&FlashError> for RpcError {
    fn from(e: &FlashError) -> Self {
        match e {
            FlashError::Failed { hint: Some(hint), .. } => RpcError::with_data(
                e.kind(),
                e.to_string(),
                serde_json::json!({ "recovery_hint": hint }),
            ),
            _ => RpcError::new(e.kind(), e.to_string()),
        }
    }
}

/// A flash request whose artifact map does not decode is the caller's fault.
impl From<&ArtifactError> for RpcError {
    fn from(e: &ArtifactError) -> Self {
        RpcError::invalid_request(format!("invalid artifacts: {}", e))
    }
}
