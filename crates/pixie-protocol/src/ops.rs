//! Operation-specific types.

pub mod compile;
pub mod flash;
pub mod probe;
pub mod review;
pub mod status;

pub use compile::{ArtifactMap, ArtifactPayload, CompileRequest, CompileResponse};
pub use flash::{FlashRequest, FlashResponse};
pub use probe::{BoardInfo, ProbeRequest, ProbeResponse};
pub use review::{ReviewRequest, ReviewResponse};
pub use status::{StatusRequest, StatusResponse, ToolchainStatus};

/// Known operation names.
pub mod names {
    pub const PROBE: &str = "probe";
    pub const STATUS: &str = "status";
    pub const COMPILE: &str = "compile";
    pub const FLASH: &str = "flash";
    pub const REVIEW: &str = "review";
}
