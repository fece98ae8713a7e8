//! Pixie Protocol Types
//!
//! Defines the JSON RPC envelope spoken by `pixie-lane serve`: one request
//! per line on stdin, one response per line on stdout.

pub mod error;
pub mod ops;
pub mod request;
pub mod response;

pub use error::{ErrorCode, RpcError};
pub use request::RpcRequest;
pub use response::RpcResponse;

/// Protocol version used for probe requests (sentinel value).
pub const PROTOCOL_VERSION_PROBE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Current lane version string.
pub const LANE_VERSION: &str = env!("CARGO_PKG_VERSION");
