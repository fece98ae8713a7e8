//! External tool execution.
//!
//! The compiler and the flasher are black boxes: arguments in, exit code and
//! captured output back. This module handles:
//! - Spawning the tool in its own process group
//! - Draining stdout/stderr on reader threads so pipes never fill up
//! - Enforcing the wall-clock limit (SIGTERM, grace period, SIGKILL)
//!
//! Orchestrators depend on the [`ToolRunner`] trait so tests can script
//! tool behavior without real executables.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::timeout::Deadline;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the child, if any.
    pub working_dir: Option<PathBuf>,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The command line as a single string, for logs.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a tool that ran to completion (in any exit state).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if the tool was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal name, if any.
    pub signal: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// Convenience constructor for a clean exit with the given code.
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            signal: None,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Text for diagnosing a failure: stderr followed by stdout, leaving
    /// out a blank stream.
    pub fn diagnostics(&self) -> String {
        combine_streams(&self.stdout, &self.stderr)
    }

    /// Short description of how the tool exited.
    pub fn exit_description(&self) -> String {
        match (self.exit_code, &self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

/// Errors from running a tool. A non-zero exit is NOT an error here; it is
/// reported through [`ToolOutput`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error("executable not found: {program}")]
    NotFound { program: String },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {}s", after.as_secs())]
    TimedOut {
        program: String,
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error while running tool: {0}")]
    Io(#[from] io::Error),
}

/// Runs external tools.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunError>;
}

/// Runs tools as real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    termination_grace: Duration,
}

impl ProcessRunner {
    pub fn new(termination_grace: Duration) -> Self {
        Self { termination_grace }
    }

    /// Terminate a child (and its process group) gracefully then forcefully.
    fn terminate_child(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(child.id() as i32);
            let _ = signal::killpg(pgid, Signal::SIGTERM);

            let start = Instant::now();
            while start.elapsed() < self.termination_grace {
                match child.try_wait() {
                    Ok(Some(_)) => {
                        // Leader is gone; make sure stragglers holding our
                        // pipes go with it.
                        let _ = signal::killpg(pgid, Signal::SIGKILL);
                        return;
                    }
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(_) => break,
                }
            }

            let _ = signal::killpg(pgid, Signal::SIGKILL);
        }

        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunError> {
        let deadline = Deadline::after(invocation.timeout);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = invocation.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        log::debug!("running: {}", invocation.command_line());

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RunError::NotFound {
                    program: invocation.program.clone(),
                }
            } else {
                RunError::Spawn {
                    program: invocation.program.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if deadline.expired() => {
                    log::warn!(
                        "{} exceeded {}s, terminating",
                        invocation.program,
                        invocation.timeout.as_secs()
                    );
                    self.terminate_child(&mut child);
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL.min(deadline.remaining())),
                Err(e) => {
                    self.terminate_child(&mut child);
                    return Err(RunError::Io(e));
                }
            }
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        match status {
            Some(status) => {
                let output = ToolOutput {
                    exit_code: status.code(),
                    signal: signal_name(&status),
                    stdout,
                    stderr,
                    duration: deadline.elapsed(),
                };
                log::debug!(
                    "{} finished with {} in {}ms",
                    invocation.program,
                    output.exit_description(),
                    output.duration.as_millis()
                );
                Ok(output)
            }
            None => Err(RunError::TimedOut {
                program: invocation.program.clone(),
                after: invocation.timeout,
                stdout,
                stderr,
            }),
        }
    }
}

/// Read a child pipe to the end on a background thread.
/// Join captured streams, stderr first. Blank streams are left out, so a
/// tool that only wrote to one stream gets exactly that stream back.
pub fn combine_streams(stdout: &str, stderr: &str) -> String {
    [stderr, stdout]
        .iter()
        .map(|stream| stream.trim_end())
        .filter(|stream| !stream.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Partial output captured before a limit expired, formatted for appending
/// to an error message. Empty when nothing was captured.
pub fn partial_output_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!("\n\npartial output:\n{}", output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn signal_name(status: &ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| format!("SIG{}", s))
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let invocation = ToolInvocation::new("arduino-cli", Duration::from_secs(1))
            .args(["core", "list"]);
        assert_eq!(invocation.command_line(), "arduino-cli core list");
        assert_eq!(
            ToolInvocation::new("true", Duration::from_secs(1)).command_line(),
            "true"
        );
    }

    #[test]
    fn test_diagnostics_keeps_both_streams() {
        let output = ToolOutput::exited(1, "Failed to connect to ESP32-S3\n", "fatal: bad\n");
        assert_eq!(output.diagnostics(), "fatal: bad\nFailed to connect to ESP32-S3");

        let output = ToolOutput::exited(1, "A fatal error occurred", "  \n");
        assert_eq!(output.diagnostics(), "A fatal error occurred");

        let output = ToolOutput::exited(1, "", "only stderr");
        assert_eq!(output.diagnostics(), "only stderr");

        assert_eq!(ToolOutput::exited(1, "", "").diagnostics(), "");
    }

    #[test]
    fn test_partial_output_suffix() {
        assert_eq!(partial_output_suffix(""), "");
        assert_eq!(
            partial_output_suffix("Compiling sketch..."),
            "\n\npartial output:\nCompiling sketch..."
        );
    }

    #[test]
    fn test_missing_executable() {
        let runner = ProcessRunner::default();
        let invocation =
            ToolInvocation::new("pixie-lane-no-such-tool-7f3a", Duration::from_secs(5));
        let result = runner.run(&invocation);
        assert!(matches!(result, Err(RunError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_exit_code() {
        let runner = ProcessRunner::default();
        let invocation = ToolInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "echo out; echo err >&2; exit 3"]);

        let output = runner.run(&invocation).unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::default();
        let invocation = ToolInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "touch marker"])
            .current_dir(temp.path());

        let output = runner.run(&invocation).unwrap();

        assert!(output.success());
        assert!(temp.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let invocation = ToolInvocation::new("sleep", Duration::from_millis(200)).arg("30");

        let start = Instant::now();
        let result = runner.run(&invocation);

        assert!(matches!(result, Err(RunError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_keeps_partial_output() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let invocation = ToolInvocation::new("sh", Duration::from_millis(300))
            .args(["-c", "echo started; exec sleep 30"]);

        match runner.run(&invocation) {
            Err(RunError::TimedOut { stdout, after, .. }) => {
                assert_eq!(stdout.trim(), "started");
                assert_eq!(after, Duration::from_millis(300));
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }
}
