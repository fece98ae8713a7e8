//! In-process stand-in for the compiler and flasher executables.
//!
//! [`MockRunner`] implements [`ToolRunner`] by classifying each invocation
//! into a [`ToolStep`] and replaying the behavior configured for that step.
//! Compile steps can write artifact files into the requested output
//! directory, and flash steps capture the staged images before the flash
//! workspace is removed, so tests can assert on exactly what would have
//! reached the device.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::artifact::ArtifactKind;
use crate::process::{RunError, ToolInvocation, ToolOutput, ToolRunner};

/// `core list` output that includes the default platform.
pub const LISTING_WITH_ESP32: &str =
    "ID          Installed Latest Name\nesp32:esp32 3.0.7     3.0.7  esp32\n";

/// Which external step an invocation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolStep {
    PlatformCheck,
    IndexUpdate,
    PlatformInstall,
    Compile,
    Flash,
    Other,
}

impl ToolStep {
    pub fn classify(invocation: &ToolInvocation) -> Self {
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["core", "list", ..] => Self::PlatformCheck,
            ["core", "update-index", ..] => Self::IndexUpdate,
            ["core", "install", ..] => Self::PlatformInstall,
            ["compile", ..] => Self::Compile,
            _ if args.contains(&"write_flash") => Self::Flash,
            _ => Self::Other,
        }
    }
}

/// What the fake tool does for one step.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Exit with the given code and output.
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Write these artifacts for the sketch being compiled, then exit 0.
    Artifacts(Vec<(ArtifactKind, Vec<u8>)>),
    /// Report a timeout with whatever partial output is given.
    TimedOut { stdout: String, stderr: String },
    /// Act as if the executable does not exist.
    NotFound,
}

impl MockBehavior {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::TimedOut {
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// An image the flasher was asked to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashedImage {
    pub offset: String,
    pub bytes: Vec<u8>,
}

/// Scripted [`ToolRunner`].
///
/// Defaults: the platform check lists `esp32:esp32`, compiles write a merged
/// image, flashes succeed. Unconfigured `Other` steps exit 0 silently.
pub struct MockRunner {
    behaviors: Mutex<HashMap<ToolStep, MockBehavior>>,
    calls: Mutex<Vec<ToolInvocation>>,
    flashed: Mutex<Vec<FlashedImage>>,
    delay: Duration,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        let mut behaviors = HashMap::new();
        behaviors.insert(ToolStep::PlatformCheck, MockBehavior::ok(LISTING_WITH_ESP32));
        behaviors.insert(
            ToolStep::Compile,
            MockBehavior::Artifacts(vec![(ArtifactKind::Merged, b"merged image".to_vec())]),
        );
        behaviors.insert(
            ToolStep::Flash,
            MockBehavior::ok("Wrote 12 bytes\nHash of data verified.\nHard resetting via RTS pin...\n"),
        );
        Self {
            behaviors: Mutex::new(behaviors),
            calls: Mutex::new(Vec::new()),
            flashed: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the behavior for a step.
    pub fn on(self, step: ToolStep, behavior: MockBehavior) -> Self {
        self.set(step, behavior);
        self
    }

    /// Change the behavior for a step in place.
    pub fn set(&self, step: ToolStep, behavior: MockBehavior) {
        lock(&self.behaviors).insert(step, behavior);
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        lock(&self.calls).clone()
    }

    /// Invocations of one step.
    pub fn calls_for(&self, step: ToolStep) -> Vec<ToolInvocation> {
        lock(&self.calls)
            .iter()
            .filter(|inv| ToolStep::classify(inv) == step)
            .cloned()
            .collect()
    }

    /// Images captured from flash invocations, in argument order.
    pub fn flashed(&self) -> Vec<FlashedImage> {
        lock(&self.flashed).clone()
    }

    fn behavior(&self, step: ToolStep) -> Option<MockBehavior> {
        lock(&self.behaviors).get(&step).cloned()
    }

    fn capture_flash(&self, invocation: &ToolInvocation) {
        let args = &invocation.args;
        let Some(size_at) = args.iter().position(|a| a == "--flash_size") else {
            return;
        };
        let pairs = args.get(size_at + 2..).unwrap_or_default();
        let mut flashed = lock(&self.flashed);
        for pair in pairs.chunks(2) {
            if let [offset, file] = pair {
                flashed.push(FlashedImage {
                    offset: offset.clone(),
                    bytes: fs::read(file).unwrap_or_default(),
                });
            }
        }
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunError> {
        lock(&self.calls).push(invocation.clone());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let step = ToolStep::classify(invocation);
        let behavior = self.behavior(step).unwrap_or_else(|| MockBehavior::ok(""));

        match behavior {
            MockBehavior::NotFound => Err(RunError::NotFound {
                program: invocation.program.clone(),
            }),
            MockBehavior::TimedOut { stdout, stderr } => Err(RunError::TimedOut {
                program: invocation.program.clone(),
                after: invocation.timeout,
                stdout,
                stderr,
            }),
            MockBehavior::Exit { code, stdout, stderr } => {
                if step == ToolStep::Flash {
                    self.capture_flash(invocation);
                }
                Ok(ToolOutput::exited(code, stdout, stderr))
            }
            MockBehavior::Artifacts(images) => {
                write_compile_outputs(invocation, &images)?;
                Ok(ToolOutput::exited(0, "Sketch uses 1024 bytes.\n", ""))
            }
        }
    }
}

/// Write images the way the compiler names them: `<sketch>.ino.*` in the
/// `--output-dir` directory, where the sketch is the last argument.
fn write_compile_outputs(
    invocation: &ToolInvocation,
    images: &[(ArtifactKind, Vec<u8>)],
) -> Result<(), RunError> {
    let args = &invocation.args;
    let out_dir = args
        .iter()
        .position(|a| a == "--output-dir")
        .and_then(|i| args.get(i + 1))
        .map(Path::new);
    let sketch = args
        .last()
        .and_then(|s| Path::new(s).file_name())
        .and_then(|n| n.to_str());

    let (Some(out_dir), Some(sketch)) = (out_dir, sketch) else {
        return Err(RunError::Spawn {
            program: invocation.program.clone(),
            reason: "compile invocation lacks --output-dir or sketch path".to_string(),
        });
    };

    for (kind, bytes) in images {
        fs::write(out_dir.join(kind.file_name(sketch)), bytes)?;
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
