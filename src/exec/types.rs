//! Core execution types and the command runner abstraction.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Default upper bound for a single spawned command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Builds an output with the given exit code and empty streams.
    #[must_use]
    pub const fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable representation of the exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while spawning or supervising a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command exceeds its time budget.
    #[error("{program} did not finish within {seconds} seconds")]
    Timeout {
        /// Command that was cancelled.
        program: String,
        /// Budget that expired.
        seconds: u64,
    },
    /// Raised when a stage has no reachable host assigned yet.
    #[error("no host is configured for this target")]
    UnassignedTarget,
    /// Raised when the secret holding SSH key material is absent.
    #[error("secret {name} is not available")]
    MissingSecret {
        /// Name of the missing secret.
        name: String,
    },
    /// Raised when key material cannot be written to a temporary file.
    #[error("failed to materialise key material: {message}")]
    KeyMaterial {
        /// Human-readable error message.
        message: String,
    },
}

/// Future returned by execution primitives.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ExecError>> + Send + 'a>>;

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started and
    /// [`ExecError::Timeout`] if it outlives the runner's budget.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ExecFuture<'a, CommandOutput>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug)]
pub struct ProcessCommandRunner {
    timeout: Duration,
}

impl ProcessCommandRunner {
    /// Creates a runner that cancels commands after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            let child = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output();

            let output = timeout(self.timeout, child)
                .await
                .map_err(|_| ExecError::Timeout {
                    program: program.to_owned(),
                    seconds: self.timeout.as_secs(),
                })?
                .map_err(|err| ExecError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
