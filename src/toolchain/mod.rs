//! Compiler toolchain readiness.
//!
//! Tracks whether the external compiler and the board platform are usable
//! and installs the platform at most once per process. State machine:
//!
//! ```text
//! Unchecked --claim--> Installing --ok--> Ready
//!                                 \-err-> Failed(reason)
//! ```
//!
//! `Ready` and `Failed` are terminal; a failed install needs a restart.
//! The claim covers the platform check too, so two callers racing from
//! `Unchecked` never run the check or the install steps twice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::ToolchainConfig;
use crate::process::{RunError, ToolInvocation, ToolOutput, ToolRunner};
use crate::timeout::TimeoutConfig;

/// Failure reason recorded when a claimed sequence unwinds.
pub const ABORTED_REASON: &str = "toolchain install aborted";

/// Toolchain readiness state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainState {
    /// Nothing has been checked yet.
    Unchecked,
    /// A check/install sequence is in flight.
    Installing,
    /// The platform is installed and compiles may run.
    Ready,
    /// The sequence failed; the reason says which step.
    Failed { reason: String },
}

impl ToolchainState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. })
    }

    /// Lowercase state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Installing => "installing",
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    /// Failure reason, if failed.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolchainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a check/install sequence failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolchainFailure {
    /// The compiler CLI is not installed at all.
    #[error("toolchain executable '{cli}' not found")]
    ExecutableMissing { cli: String },

    /// The CLI exists but listing installed platforms failed.
    #[error("toolchain check failed: {detail}")]
    CheckFailed { detail: String },

    #[error("platform index update failed: {detail}")]
    IndexUpdateFailed { detail: String },

    #[error("platform index update timed out after {seconds}s")]
    IndexUpdateTimedOut { seconds: u64 },

    #[error("platform '{platform}' install failed: {detail}")]
    PlatformInstallFailed { platform: String, detail: String },

    #[error("platform '{platform}' install timed out after {seconds}s")]
    PlatformInstallTimedOut { platform: String, seconds: u64 },
}

/// How a successful sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    AlreadyInstalled,
    Installed,
}

/// Owns the process-wide toolchain state.
pub struct ToolchainManager {
    config: ToolchainConfig,
    timeouts: TimeoutConfig,
    runner: Arc<dyn ToolRunner>,
    state: Mutex<ToolchainState>,
    changed: Condvar,
    install_runs: AtomicUsize,
}

impl ToolchainManager {
    pub fn new(config: ToolchainConfig, timeouts: TimeoutConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            config,
            timeouts,
            runner,
            state: Mutex::new(ToolchainState::Unchecked),
            changed: Condvar::new(),
            install_runs: AtomicUsize::new(0),
        }
    }

    /// Current state. Never blocks on an in-flight install.
    pub fn state(&self) -> ToolchainState {
        self.lock_state().clone()
    }

    /// Number of install sequences (index update + platform install) that
    /// have actually started.
    pub fn install_runs(&self) -> usize {
        self.install_runs.load(Ordering::SeqCst)
    }

    /// Bring the toolchain to a terminal state and return it.
    ///
    /// The first caller from `Unchecked` runs the sequence; concurrent
    /// callers wait for it to finish; later callers get the stored result.
    pub fn check_or_install(&self) -> ToolchainState {
        {
            let mut state = self
                .changed
                .wait_while(self.lock_state(), |s| *s == ToolchainState::Installing)
                .unwrap_or_else(PoisonError::into_inner);
            if state.is_terminal() {
                return state.clone();
            }
            *state = ToolchainState::Installing;
        }
        let claim = InstallClaim {
            manager: self,
            published: false,
        };

        log::info!("checking toolchain platform {}", self.config.platform);

        let terminal = match self.run_sequence() {
            Ok(Readiness::AlreadyInstalled) => {
                log::info!("toolchain ready (platform {} already installed)", self.config.platform);
                ToolchainState::Ready
            }
            Ok(Readiness::Installed) => {
                log::info!("toolchain ready (platform {} installed)", self.config.platform);
                ToolchainState::Ready
            }
            Err(failure) => {
                log::error!("toolchain unavailable: {}", failure);
                ToolchainState::Failed {
                    reason: failure.to_string(),
                }
            }
        };

        claim.publish(terminal.clone());
        terminal
    }

    /// Run `check_or_install` on a background thread.
    ///
    /// Meant to be called once at service start; request handlers then only
    /// poll [`state`](Self::state).
    pub fn spawn_background(self: &Arc<Self>) -> std::io::Result<JoinHandle<ToolchainState>> {
        let manager = Arc::clone(self);
        thread::Builder::new()
            .name("toolchain-install".to_string())
            .spawn(move || manager.check_or_install())
    }

    fn run_sequence(&self) -> Result<Readiness, ToolchainFailure> {
        let listing = self.run_check()?;
        if platform_listed(&listing.stdout, &self.config.platform) {
            return Ok(Readiness::AlreadyInstalled);
        }

        self.install_runs.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "platform {} missing, installing (this can take several minutes)",
            self.config.platform
        );

        let update = self.invocation(self.timeouts.index_update()).args(["core", "update-index"]);
        let update = self.with_additional_urls(update);
        match self.runner.run(&update) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                return Err(ToolchainFailure::IndexUpdateFailed {
                    detail: failure_detail(&output),
                })
            }
            Err(RunError::TimedOut { after, .. }) => {
                return Err(ToolchainFailure::IndexUpdateTimedOut {
                    seconds: after.as_secs(),
                })
            }
            Err(e) => {
                return Err(ToolchainFailure::IndexUpdateFailed {
                    detail: e.to_string(),
                })
            }
        }

        let install = self
            .invocation(self.timeouts.platform_install())
            .args(["core", "install"])
            .arg(self.config.platform.clone());
        let install = self.with_additional_urls(install);
        match self.runner.run(&install) {
            Ok(output) if output.success() => Ok(Readiness::Installed),
            Ok(output) => Err(ToolchainFailure::PlatformInstallFailed {
                platform: self.config.platform.clone(),
                detail: failure_detail(&output),
            }),
            Err(RunError::TimedOut { after, .. }) => Err(ToolchainFailure::PlatformInstallTimedOut {
                platform: self.config.platform.clone(),
                seconds: after.as_secs(),
            }),
            Err(e) => Err(ToolchainFailure::PlatformInstallFailed {
                platform: self.config.platform.clone(),
                detail: e.to_string(),
            }),
        }
    }

    fn run_check(&self) -> Result<ToolOutput, ToolchainFailure> {
        let list = self.invocation(self.timeouts.check()).args(["core", "list"]);
        match self.runner.run(&list) {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(ToolchainFailure::CheckFailed {
                detail: failure_detail(&output),
            }),
            Err(RunError::NotFound { program }) => {
                Err(ToolchainFailure::ExecutableMissing { cli: program })
            }
            Err(e) => Err(ToolchainFailure::CheckFailed {
                detail: e.to_string(),
            }),
        }
    }

    fn invocation(&self, timeout: Duration) -> ToolInvocation {
        ToolInvocation::new(self.config.cli.clone(), timeout)
    }

    fn with_additional_urls(&self, invocation: ToolInvocation) -> ToolInvocation {
        if self.config.additional_urls.is_empty() {
            invocation
        } else {
            invocation
                .arg("--additional-urls")
                .arg(self.config.additional_urls.join(","))
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ToolchainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The right to run the sequence. Publishing the terminal state wakes
/// waiters; dropping the claim unpublished (a panic in the runner) records
/// `Failed` so waiters never block forever.
struct InstallClaim<'a> {
    manager: &'a ToolchainManager,
    published: bool,
}

impl InstallClaim<'_> {
    fn publish(mut self, state: ToolchainState) {
        self.set(state);
    }

    fn set(&mut self, state: ToolchainState) {
        self.published = true;
        *self.manager.lock_state() = state;
        self.manager.changed.notify_all();
    }
}

impl Drop for InstallClaim<'_> {
    fn drop(&mut self) {
        if !self.published {
            log::error!("toolchain check/install aborted");
            self.set(ToolchainState::Failed {
                reason: ABORTED_REASON.to_string(),
            });
        }
    }
}

/// True if `core list` output has a row whose ID column is `platform`.
fn platform_listed(listing: &str, platform: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|id| id == platform)
}

fn failure_detail(output: &ToolOutput) -> String {
    let diagnostics = output.diagnostics();
    let diagnostics = diagnostics.trim();
    if diagnostics.is_empty() {
        output.exit_description()
    } else {
        format!("{} ({})", diagnostics, output.exit_description())
    }
}
