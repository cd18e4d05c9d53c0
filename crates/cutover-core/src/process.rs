//! Subprocess execution for script phases.
//!
//! Programs are invoked directly with an argument array, never through a
//! shell. The child inherits the environment, gets a null stdin, and has its
//! output captured.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::PhaseError;

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code, or `None` if the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    /// A zero exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A non-zero exit with the given stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a program to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout` for it to exit.
    ///
    /// A non-zero exit is returned as a [`ProcessResult`], not an error.
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ProcessResult, PhaseError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ProcessResult, PhaseError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PhaseError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        tracing::debug!(program = %program.display(), pid = ?child.id(), "spawned script");

        // On timeout the future (and with it the child) is dropped, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| PhaseError::Timeout {
                program: program.to_path_buf(),
                after: timeout,
            })?
            .map_err(|source| PhaseError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        Ok(ProcessResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ScriptedOutcome, ScriptedRunner};

#[cfg(any(test, feature = "test-util"))]
mod scripted {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use parking_lot::Mutex;

    use super::*;

    /// Canned behaviour for one program.
    #[derive(Debug, Clone)]
    pub enum ScriptedOutcome {
        /// Exit with this result.
        Exit(ProcessResult),
        /// Fail to start.
        SpawnFailure,
        /// Never exit before the deadline.
        Hang,
    }

    /// [`ProcessRunner`] that returns canned results keyed by program file
    /// name and records every invocation. Unknown programs exit cleanly.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        outcomes: HashMap<String, ScriptedOutcome>,
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the outcome for the program whose file name is `name`.
        pub fn on(mut self, name: &str, outcome: ScriptedOutcome) -> Self {
            self.outcomes.insert(name.to_string(), outcome);
            self
        }

        /// Make `name` exit with `exit_code`.
        pub fn fail(self, name: &str, exit_code: i32) -> Self {
            self.on(
                name,
                ScriptedOutcome::Exit(ProcessResult::failed(exit_code, format!("{name} failed"))),
            )
        }

        /// Programs invoked, in order.
        pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
            self.calls.lock().clone()
        }

        /// File names of the programs invoked, in order.
        pub fn called_names(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ProcessResult, PhaseError> {
            self.calls.lock().push((program.to_path_buf(), args.to_vec()));

            let name = program
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.outcomes.get(&name).cloned() {
                None => Ok(ProcessResult::ok(format!("{name} ok"))),
                Some(ScriptedOutcome::Exit(result)) => Ok(result),
                Some(ScriptedOutcome::SpawnFailure) => Err(PhaseError::Spawn {
                    program: program.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                }),
                Some(ScriptedOutcome::Hang) => Err(PhaseError::Timeout {
                    program: program.to_path_buf(),
                    after: timeout,
                }),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(
                Path::new("/bin/sh"),
                &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success());
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = TokioProcessRunner;
        let err = runner
            .run(
                Path::new("/bin/sh"),
                &["-c".to_string(), "sleep 30".to_string()],
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = TokioProcessRunner;
        let err = runner
            .run(Path::new("/nonexistent/cutover-script"), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Spawn { .. }));
    }
}
