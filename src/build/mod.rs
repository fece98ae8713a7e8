//! Compile jobs.
//!
//! [`BuildOrchestrator::compile`] turns sketch source into an
//! [`ArtifactSet`]: validate, gate on toolchain readiness, seed a private
//! workspace, run the compiler under a wall-clock limit, then read the
//! produced images into memory. The workspace is removed before `compile`
//! returns on every path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::artifact::{ArtifactError, ArtifactResolver, ArtifactSet};
use crate::config::ToolchainConfig;
use crate::error::ErrorKind;
use crate::process::{combine_streams, partial_output_suffix, RunError, ToolInvocation, ToolRunner};
use crate::timeout::TimeoutConfig;
use crate::toolchain::{ToolchainManager, ToolchainState};
use crate::workspace::{Workspace, WorkspaceError};

/// Message for empty or whitespace-only source.
pub const EMPTY_SOURCE_MESSAGE: &str = "Code cannot be empty";

/// Result of a successful compile.
#[derive(Debug, Clone)]
pub struct CompiledFirmware {
    /// Job id; also the name the sketch was compiled under.
    pub job_id: String,
    pub artifacts: ArtifactSet,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{}", EMPTY_SOURCE_MESSAGE)]
    EmptySource,

    #[error("toolchain not ready: {reason}")]
    ToolchainNotReady { reason: String },

    #[error("compilation failed:\n{diagnostics}")]
    Compilation { diagnostics: String },

    #[error(
        "compilation timed out after {}s, try simplifying the code{}",
        after.as_secs(),
        partial_output_suffix(.output)
    )]
    TimedOut { after: Duration, output: String },

    #[error("compiler succeeded but {0}")]
    NoArtifacts(ArtifactError),

    #[error("failed to read build output: {0}")]
    Artifacts(ArtifactError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to run compiler: {0}")]
    Run(RunError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptySource => ErrorKind::ValidationError,
            Self::ToolchainNotReady { .. } => ErrorKind::ToolchainNotReady,
            Self::Compilation { .. } => ErrorKind::CompilationError,
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::NoArtifacts(_) => ErrorKind::NoArtifacts,
            Self::Artifacts(_) | Self::Workspace(_) | Self::Run(_) => ErrorKind::Internal,
        }
    }
}

/// Why a compile can't start yet, given a non-ready state.
fn not_ready(state: &ToolchainState) -> BuildError {
    let reason = match state {
        ToolchainState::Failed { reason } => reason.clone(),
        other => format!("toolchain is initializing ({}), retry shortly", other.name()),
    };
    BuildError::ToolchainNotReady { reason }
}

/// Drives compile jobs. Cheap to share; jobs run fully in parallel.
pub struct BuildOrchestrator {
    build_root: PathBuf,
    toolchain_config: ToolchainConfig,
    timeouts: TimeoutConfig,
    toolchain: Arc<ToolchainManager>,
    runner: Arc<dyn ToolRunner>,
}

impl BuildOrchestrator {
    pub fn new(
        build_root: impl Into<PathBuf>,
        toolchain_config: ToolchainConfig,
        timeouts: TimeoutConfig,
        toolchain: Arc<ToolchainManager>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            build_root: build_root.into(),
            toolchain_config,
            timeouts,
            toolchain,
            runner,
        }
    }

    /// Compile `source` for the configured board.
    ///
    /// Does not wait for the toolchain: if it is not ready the call fails
    /// at once with [`BuildError::ToolchainNotReady`].
    pub fn compile(&self, source: &str) -> Result<CompiledFirmware, BuildError> {
        if source.trim().is_empty() {
            return Err(BuildError::EmptySource);
        }

        let state = self.toolchain.state();
        if !state.is_ready() {
            return Err(not_ready(&state));
        }

        let started = Instant::now();
        let workspace = Workspace::create(&self.build_root, source)?;
        let job_id = workspace.name().to_string();
        log::info!("[{}] compile started", job_id);

        let result = self.compile_in(&workspace);
        workspace.destroy();

        let duration = started.elapsed();
        match result {
            Ok(artifacts) => {
                log::info!(
                    "[{}] compile finished in {}ms ({} artifacts, {} bytes)",
                    job_id,
                    duration.as_millis(),
                    artifacts.len(),
                    artifacts.total_bytes()
                );
                Ok(CompiledFirmware {
                    job_id,
                    artifacts,
                    duration,
                })
            }
            Err(e) => {
                log::warn!("[{}] compile failed after {}ms: {}", job_id, duration.as_millis(), e.kind());
                Err(e)
            }
        }
    }

    fn compile_in(&self, workspace: &Workspace) -> Result<ArtifactSet, BuildError> {
        let dir = workspace.path().to_string_lossy().to_string();
        let invocation = ToolInvocation::new(self.toolchain_config.cli.clone(), self.timeouts.compile())
            .args(["compile", "--fqbn"])
            .arg(self.toolchain_config.fqbn.clone())
            .arg("--output-dir")
            .arg(dir.clone())
            .arg(dir);
        log::debug!("[{}] {}", workspace.name(), invocation.command_line());

        let output = match self.runner.run(&invocation) {
            Ok(output) => output,
            Err(RunError::TimedOut {
                after, stdout, stderr, ..
            }) => {
                return Err(BuildError::TimedOut {
                    after,
                    output: combine_streams(&stdout, &stderr),
                })
            }
            Err(e) => return Err(BuildError::Run(e)),
        };

        if !output.success() {
            return Err(BuildError::Compilation {
                diagnostics: output.diagnostics(),
            });
        }

        ArtifactResolver::for_workspace(workspace)
            .resolve()
            .map_err(|e| match e {
                ArtifactError::NoArtifacts { .. } => BuildError::NoArtifacts(e),
                other => BuildError::Artifacts(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::mock::{MockBehavior, MockRunner, ToolStep};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn ready_orchestrator(root: &Path, runner: MockRunner) -> (BuildOrchestrator, Arc<MockRunner>) {
        let runner = Arc::new(runner);
        let toolchain = Arc::new(ToolchainManager::new(
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            runner.clone(),
        ));
        assert!(toolchain.check_or_install().is_ready());
        let orchestrator = BuildOrchestrator::new(
            root,
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            toolchain,
            runner.clone(),
        );
        (orchestrator, runner)
    }

    fn entries(root: &Path) -> usize {
        fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_empty_source_rejected_before_workspace() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("builds");
        let (orch, runner) = ready_orchestrator(&root, MockRunner::new());

        for source in ["", "   ", "\n\t\n"] {
            let err = orch.compile(source).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
            assert_eq!(err.to_string(), "Code cannot be empty");
        }
        assert!(!root.exists());
        assert!(runner.calls_for(ToolStep::Compile).is_empty());
    }

    #[test]
    fn test_merged_image_compile() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(
            ToolStep::Compile,
            MockBehavior::Artifacts(vec![(ArtifactKind::Merged, b"firmware".to_vec())]),
        );
        let (orch, runner) = ready_orchestrator(tmp.path(), runner);

        let firmware = orch.compile("void setup() {}\nvoid loop() {}\n").unwrap();
        assert!(firmware.job_id.starts_with("sketch_"));
        let merged = firmware.artifacts.get(ArtifactKind::Merged).unwrap();
        assert_eq!(merged.offset_hex(), "0x0");
        assert_eq!(merged.bytes(), b"firmware");
        assert_eq!(entries(tmp.path()), 0);

        let call = &runner.calls_for(ToolStep::Compile)[0];
        assert_eq!(call.program, "arduino-cli");
        assert_eq!(call.args[1..3], ["--fqbn", "esp32:esp32:axiometa_pixie_m1:CDCOnBoot=cdc"]);
        assert_eq!(call.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_compilation_error_carries_diagnostics() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(
            ToolStep::Compile,
            MockBehavior::fail(1, "sketch.ino:3:1: error: expected ';' before '}' token"),
        );
        let (orch, _) = ready_orchestrator(tmp.path(), runner);

        let err = orch.compile("void setup() { int x = 1 }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompilationError);
        assert!(err.to_string().contains("expected ';' before '}' token"));
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn test_compilation_error_keeps_both_streams() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(
            ToolStep::Compile,
            MockBehavior::Exit {
                code: 1,
                stdout: "Sketch uses 1024 bytes; Error during build: exit status 1".to_string(),
                stderr: "sketch.ino:1:1: error: 'foo' does not name a type".to_string(),
            },
        );
        let (orch, _) = ready_orchestrator(tmp.path(), runner);

        let message = orch.compile("foo bar;").unwrap_err().to_string();
        assert!(message.contains("'foo' does not name a type"));
        assert!(message.contains("Error during build"));
    }

    #[test]
    fn test_timeout_is_distinct_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(
            ToolStep::Compile,
            MockBehavior::TimedOut {
                stdout: "Compiling core...".to_string(),
                stderr: String::new(),
            },
        );
        let (orch, _) = ready_orchestrator(tmp.path(), runner);

        let err = orch.compile("void setup() {}").unwrap_err();
        match &err {
            BuildError::TimedOut { after, output } => {
                assert_eq!(*after, Duration::from_secs(120));
                assert_eq!(output, "Compiling core...");
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().ends_with("partial output:\nCompiling core..."));
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn test_timeout_without_output_has_plain_message() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(ToolStep::Compile, MockBehavior::timed_out());
        let (orch, _) = ready_orchestrator(tmp.path(), runner);

        let err = orch.compile("void setup() {}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "compilation timed out after 120s, try simplifying the code"
        );
    }

    #[test]
    fn test_no_artifacts() {
        let tmp = TempDir::new().unwrap();
        let runner = MockRunner::new().on(ToolStep::Compile, MockBehavior::Artifacts(vec![]));
        let (orch, _) = ready_orchestrator(tmp.path(), runner);

        let err = orch.compile("void setup() {}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoArtifacts);
        assert!(!err.kind().is_retryable());
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn test_failed_toolchain_blocks_compile() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(
            MockRunner::new()
                .on(ToolStep::PlatformCheck, MockBehavior::ok("No platforms installed.\n"))
                .on(ToolStep::IndexUpdate, MockBehavior::timed_out()),
        );
        let toolchain = Arc::new(ToolchainManager::new(
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            runner.clone(),
        ));
        let state = toolchain.check_or_install();
        let reason = state.reason().unwrap().to_string();

        let orch = BuildOrchestrator::new(
            tmp.path(),
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            toolchain,
            runner.clone(),
        );
        match orch.compile("void setup() {}") {
            Err(BuildError::ToolchainNotReady { reason: r }) => assert_eq!(r, reason),
            other => panic!("expected ToolchainNotReady, got {:?}", other),
        }
        assert!(runner.calls_for(ToolStep::Compile).is_empty());
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn test_unchecked_toolchain_hints_initializing() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        let toolchain = Arc::new(ToolchainManager::new(
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            runner.clone(),
        ));
        let orch = BuildOrchestrator::new(
            tmp.path(),
            ToolchainConfig::default(),
            TimeoutConfig::default(),
            toolchain,
            runner,
        );

        let err = orch.compile("void setup() {}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolchainNotReady);
        assert!(err.to_string().contains("initializing"));
    }
}
