//! Structured outcome of one executed command.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reserved for commands whose interpreter could not be spawned.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

/// Complete result of a single command invocation.
///
/// Built once by the executor and copied from there into history and
/// event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// The literal command text that was submitted.
    pub command: String,
    /// Process exit code, or [`LAUNCH_FAILURE_EXIT_CODE`].
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Completion instant.
    pub timestamp: DateTime<Utc>,
    /// Working directory in effect when the command started.
    pub working_directory: PathBuf,
    /// OS account that owns the executing session.
    pub user: String,
    /// Wall-clock milliseconds from spawn to exit.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl CommandResult {
    /// Build a launch-failure result.
    ///
    /// An empty `reason` is replaced so that stderr is never blank.
    #[must_use]
    pub fn launch_failure(
        command: impl Into<String>,
        working_directory: PathBuf,
        user: impl Into<String>,
        reason: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let mut stderr: String = reason.into();
        if stderr.trim().is_empty() {
            stderr = "failed to launch command".to_string();
        }
        Self {
            command: command.into(),
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr,
            timestamp: Utc::now(),
            working_directory,
            user: user.into(),
            duration_ms,
        }
    }

    /// Whether the command exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the command never started.
    #[must_use]
    pub const fn is_launch_failure(&self) -> bool {
        self.exit_code == LAUNCH_FAILURE_EXIT_CODE
    }
}

/// A command result paired with the client's correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandResult {
    pub command_id: String,
    #[serde(flatten)]
    pub result: CommandResult,
}

impl RemoteCommandResult {
    #[must_use]
    pub fn new(command_id: impl Into<String>, result: CommandResult) -> Self {
        Self {
            command_id: command_id.into(),
            result,
        }
    }
}

/// Which stream a chunk of live output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of output captured while a command is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: Vec<u8>,
}
