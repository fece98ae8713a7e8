//! RPC request types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// RPC request envelope.
///
/// Each request is a single JSON object on its own line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version. For probe requests, this MUST be 0.
    pub protocol_version: i32,
    /// Operation name.
    pub op: String,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    /// Create a request with a serialized payload.
    pub fn new(
        protocol_version: i32,
        op: impl Into<String>,
        request_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol_version,
            op: op.into(),
            request_id: request_id.into(),
            payload,
        }
    }

    /// Decode the payload into the operation's request type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let payload = if self.payload.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.payload.clone()
        };
        serde_json::from_value(payload)
            .map_err(|e| RpcError::invalid_request(format!("invalid {} payload: {}", self.op, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::CompileRequest;

    #[test]
    fn test_parse_compile_payload() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"protocol_version":1,"op":"compile","request_id":"r1","payload":{"code":"void setup(){}"}}"#,
        )
        .unwrap();
        let payload: CompileRequest = request.parse_payload().unwrap();
        assert_eq!(payload.code, "void setup(){}");
    }

    #[test]
    fn test_missing_payload_defaults_to_empty_object() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"protocol_version":1,"op":"status","request_id":"r2"}"#).unwrap();
        let payload: crate::ops::StatusRequest = request.parse_payload().unwrap();
        let _ = payload;
    }

    #[test]
    fn test_parse_payload_reports_op() {
        let request = RpcRequest::new(1, "compile", "r3", serde_json::json!({"source": 1}));
        let err = request.parse_payload::<CompileRequest>().unwrap_err();
        assert!(err.message.contains("compile"));
    }
}
