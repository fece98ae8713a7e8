//! Lane responses.
//!
//! A serve session writes a stream of these, one JSON object per line, in
//! completion order rather than request order. Clients match a line to its
//! request by `request_id`; a line that could not be decoded gets an empty
//! id since none was read.

use serde::{Deserialize, Serialize};
use crate::error::RpcError;

/// One line of the response stream.
///
/// Exactly one of `payload` and `error` is present, selected by `ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// The request's version; 0 for probe and for undecodable lines.
    pub protocol_version: i32,
    /// Correlates this line with its request.
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(protocol_version: i32, request_id: String, payload: serde_json::Value) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(protocol_version: i32, request_id: String, error: RpcError) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Encode as a single stream line, without the trailing newline.
    /// Newlines inside payload strings are escaped by the encoder, so the
    /// result never spans lines.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_line_stays_single_line() {
        let response = RpcResponse::error(
            1,
            "job-7".to_string(),
            RpcError::new(ErrorCode::CompilationError, "compilation failed:\nsketch.ino:1: error"),
        );
        let line = response.to_line().unwrap();
        assert!(!line.contains('\n'));

        let decoded: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.request_id, "job-7");
        assert!(!decoded.ok);
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_success_omits_error_field() {
        let line = RpcResponse::success(0, String::new(), serde_json::json!({"ok": 1}))
            .to_line()
            .unwrap();
        assert!(!line.contains("\"error\""));
        assert!(line.contains("\"request_id\":\"\""));
    }
}
