//! Pixie Lane - build-and-flash engine for the Pixie M1 board
//!
//! Turns sketch source into firmware images with an external compiler and
//! writes them to an attached board with an external flasher. The crate
//! manages toolchain readiness, per-job workspaces, artifact discovery,
//! device discovery and subprocess timeouts; the compiler and flasher
//! themselves are black boxes.

pub mod advisory;
pub mod artifact;
pub mod build;
pub mod config;
pub mod device;
pub mod error;
pub mod flash;
pub mod lane;
pub mod mock;
pub mod process;
pub mod service;
pub mod timeout;
pub mod toolchain;
pub mod workspace;

pub use artifact::{Artifact, ArtifactKind, ArtifactResolver, ArtifactSet};
pub use build::{BuildError, BuildOrchestrator, CompiledFirmware};
pub use config::LaneConfig;
pub use device::{Device, DeviceLocator, KnownDevice};
pub use error::ErrorKind;
pub use flash::{FlashError, FlashOrchestrator, FlashReport};
pub use lane::Lane;
pub use service::RpcHandler;
pub use toolchain::{ToolchainManager, ToolchainState};
pub use workspace::Workspace;
