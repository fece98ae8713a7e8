//! Flash jobs.
//!
//! [`FlashOrchestrator::flash`] writes an [`ArtifactSet`] to the attached
//! target: find the device, stage the images as files, run the flasher with
//! offset/file pairs in ascending offset order. A partial split set is passed
//! through unchanged; the flasher decides whether it is usable.
//!
//! Flashes from this process are serialized. A second process flashing the
//! same port at the same time is not guarded against; the port's own open
//! semantics decide which writer wins.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use regex_lite::Regex;
use thiserror::Error;

use crate::artifact::ArtifactSet;
use crate::config::FlasherConfig;
use crate::device::{Device, DeviceError, DeviceLocator};
use crate::error::ErrorKind;
use crate::process::{combine_streams, partial_output_suffix, RunError, ToolInvocation, ToolRunner};
use crate::timeout::TimeoutConfig;
use crate::workspace::{Workspace, WorkspaceError, FLASH_PREFIX};

/// Appended to flash diagnostics that look like a connection failure.
pub const RECOVERY_HINT: &str =
    "Tip: Hold the BOOT button, start the upload, and release it once the flasher starts connecting.";

/// Message for a missing device.
pub const DEVICE_NOT_FOUND_MESSAGE: &str = "no target device found, connect device";

const SUCCESS_MESSAGE: &str = "Upload successful";

/// Outcome of a successful flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    pub message: String,
    pub port: String,
    /// The flasher's stdout.
    pub device_log: String,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("{}", DEVICE_NOT_FOUND_MESSAGE)]
    DeviceNotFound,

    #[error("{0}")]
    Enumeration(#[from] DeviceError),

    #[error("flash failed:\n{diagnostics}{}", hint_suffix(.hint))]
    Failed {
        diagnostics: String,
        hint: Option<&'static str>,
    },

    #[error("flash timed out after {}s{}", after.as_secs(), partial_output_suffix(.output))]
    TimedOut { after: Duration, output: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to run flasher: {0}")]
    Run(RunError),
}

impl FlashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound | Self::Enumeration(_) => ErrorKind::DeviceNotFound,
            Self::Failed { .. } | Self::Run(_) => ErrorKind::FlashError,
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::Workspace(_) => ErrorKind::Internal,
        }
    }
}

fn hint_suffix(hint: &Option<&'static str>) -> String {
    hint.map(|h| format!("\n\n{}", h)).unwrap_or_default()
}

/// Best-effort match of flasher output against known connection-failure
/// signatures. A heuristic: absence of a hint says nothing.
pub fn recovery_hint(diagnostics: &str) -> Option<&'static str> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"(?i)failed to connect|no serial data received").ok());
    match pattern {
        Some(re) if re.is_match(diagnostics) => Some(RECOVERY_HINT),
        _ => None,
    }
}

/// Drives flash jobs against the attached device.
pub struct FlashOrchestrator {
    build_root: PathBuf,
    flasher: FlasherConfig,
    timeouts: TimeoutConfig,
    locator: DeviceLocator,
    runner: Arc<dyn ToolRunner>,
    port_lock: Mutex<()>,
}

impl FlashOrchestrator {
    pub fn new(
        build_root: impl Into<PathBuf>,
        flasher: FlasherConfig,
        timeouts: TimeoutConfig,
        locator: DeviceLocator,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            build_root: build_root.into(),
            flasher,
            timeouts,
            locator,
            runner,
            port_lock: Mutex::new(()),
        }
    }

    pub fn locator(&self) -> &DeviceLocator {
        &self.locator
    }

    /// Write `artifacts` to the first known device found.
    pub fn flash(&self, artifacts: &ArtifactSet) -> Result<FlashReport, FlashError> {
        let _guard = self.port_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let device = self.locator.locate()?.ok_or(FlashError::DeviceNotFound)?;

        let missing = artifacts.missing_kinds();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|k| k.wire_name()).collect();
            log::warn!(
                "flashing partial image set, missing: {}; leaving it to the flasher",
                names.join(", ")
            );
        }

        let workspace = Workspace::create_empty(&self.build_root, FLASH_PREFIX)?;
        log::info!("[{}] flashing {} images to {}", workspace.name(), artifacts.len(), device);

        let result = self.flash_in(&workspace, &device, artifacts);
        workspace.destroy();

        let duration = started.elapsed();
        match result {
            Ok(device_log) => {
                log::info!("flash to {} finished in {}ms", device.port, duration.as_millis());
                Ok(FlashReport {
                    message: SUCCESS_MESSAGE.to_string(),
                    port: device.port,
                    device_log,
                    duration,
                })
            }
            Err(e) => {
                log::warn!("flash to {} failed after {}ms: {}", device.port, duration.as_millis(), e.kind());
                Err(e)
            }
        }
    }

    /// Stage images, run the flasher, return its stdout.
    fn flash_in(
        &self,
        workspace: &Workspace,
        device: &Device,
        artifacts: &ArtifactSet,
    ) -> Result<String, FlashError> {
        let mut pairs = Vec::with_capacity(artifacts.len() * 2);
        for artifact in artifacts.iter() {
            let file = format!("{}.bin", artifact.kind().wire_name());
            let path = workspace.write_file(&file, artifact.bytes())?;
            pairs.push(artifact.offset_hex());
            pairs.push(path.to_string_lossy().to_string());
        }

        let invocation = self.invocation(&device.port).args(pairs);
        log::debug!("{}", invocation.command_line());

        let output = match self.runner.run(&invocation) {
            Ok(output) => output,
            Err(RunError::TimedOut {
                after, stdout, stderr, ..
            }) => {
                return Err(FlashError::TimedOut {
                    after,
                    output: combine_streams(&stdout, &stderr),
                })
            }
            Err(e) => return Err(FlashError::Run(e)),
        };

        if output.success() {
            return Ok(output.stdout);
        }

        let diagnostics = output.diagnostics();
        let hint = recovery_hint(&diagnostics);
        Err(FlashError::Failed { diagnostics, hint })
    }

    fn invocation(&self, port: &str) -> ToolInvocation {
        let f = &self.flasher;
        ToolInvocation::new(f.program.clone(), self.timeouts.flash())
            .args(f.program_args.iter().cloned())
            .args(["--chip", f.chip.as_str(), "--port", port])
            .arg("--baud")
            .arg(f.baud.to_string())
            .args(["--before", f.before.as_str(), "--after", f.after.as_str()])
            .args(["write_flash", "-z"])
            .args(["--flash_mode", f.flash_mode.as_str()])
            .args(["--flash_freq", f.flash_freq.as_str()])
            .args(["--flash_size", f.flash_size.as_str()])
    }
}
