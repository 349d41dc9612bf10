//! Subprocess execution for one shell session.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use command_group::AsyncCommandGroup;
use shellgate_core::{CommandResult, LAUNCH_FAILURE_EXIT_CODE, OutputChunk, OutputStream, ShellContext};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::shell::{ShellCommand, current_user, expand_home};

/// Set to `1` in the environment of every command this crate runs.
pub const NESTED_MARKER_VAR: &str = "SHELLGATE_ACTIVE";

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long output readers may keep draining once a command is killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Executor error.
///
/// Command failures are never errors; they are encoded in [`CommandResult`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid directory '{path}': {reason}")]
    InvalidDirectory { path: String, reason: String },
}

/// Terminates an executor's in-flight and future commands.
///
/// Cloneable and usable without access to the executor itself.
#[derive(Debug, Clone)]
pub struct KillHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl KillHandle {
    /// Kill the running process group, if any, and refuse further commands.
    pub fn kill(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Runs commands for one session.
///
/// Owns the session's working directory and environment overlay. Callers
/// must not run commands concurrently on the same executor; wrap it in a
/// mutex when it is reachable from more than one task.
#[derive(Debug)]
pub struct Executor {
    working_dir: PathBuf,
    overlay: BTreeMap<String, String>,
    hidden: BTreeSet<String>,
    shell: ShellCommand,
    user: String,
    kill_tx: Arc<watch::Sender<bool>>,
    kill_rx: watch::Receiver<bool>,
}

impl Executor {
    /// Create an executor rooted at `working_dir` using the detected shell.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let (kill_tx, kill_rx) = watch::channel(false);
        Self {
            working_dir: working_dir.into(),
            overlay: BTreeMap::new(),
            hidden: BTreeSet::new(),
            shell: ShellCommand::detect(),
            user: current_user(),
            kill_tx: Arc::new(kill_tx),
            kill_rx,
        }
    }

    /// Override the command interpreter.
    #[must_use]
    pub fn with_shell(mut self, shell: ShellCommand) -> Self {
        self.shell = shell;
        self
    }

    /// Override the reported user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Strip these inherited variables from children and snapshots.
    #[must_use]
    pub fn with_hidden_vars<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.hidden.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Handle that terminates this executor's commands.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            tx: Arc::clone(&self.kill_tx),
        }
    }

    #[must_use]
    pub fn current_directory(&self) -> &Path {
        &self.working_dir
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Session-local variables set through [`Self::set_environment`].
    #[must_use]
    pub const fn overlay(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }

    /// Overlay one variable for subsequent commands.
    pub fn set_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overlay.insert(key.into(), value.into());
    }

    /// Drop a variable from the overlay.
    pub fn remove_environment(&mut self, key: &str) -> Option<String> {
        self.overlay.remove(key)
    }

    /// Effective environment: inherited variables, minus hidden ones, plus the overlay.
    #[must_use]
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| !self.hidden.contains(k))
            .collect();
        env.extend(self.overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Snapshot of directory and effective environment.
    #[must_use]
    pub fn context(&self) -> ShellContext {
        ShellContext {
            working_directory: self.working_dir.clone(),
            environment: self.environment(),
        }
    }

    /// Change the working directory.
    ///
    /// Relative paths resolve against the current working directory and `~`
    /// expands to the home directory. On failure the directory is unchanged.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidDirectory`] if the target does not
    /// exist, is not a directory, or cannot be read.
    pub async fn change_directory(&mut self, path: &str) -> Result<PathBuf, ExecutorError> {
        let invalid = |reason: String| ExecutorError::InvalidDirectory {
            path: path.to_string(),
            reason,
        };

        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty path".to_string()));
        }

        let expanded = expand_home(trimmed);
        let target = if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir.join(expanded)
        };

        let resolved = tokio::fs::canonicalize(&target)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        let _entries = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| invalid(e.to_string()))?;

        tracing::debug!(from = %self.working_dir.display(), to = %resolved.display(), "Changed directory");
        self.working_dir.clone_from(&resolved);
        Ok(resolved)
    }

    /// Run `command` through the shell and capture its result.
    pub async fn execute(&self, command: &str) -> CommandResult {
        self.execute_streaming(command, None).await
    }

    /// Run `command`, forwarding output chunks to `output` as they arrive.
    ///
    /// The returned result always carries the complete captured streams.
    pub async fn execute_streaming(
        &self,
        command: &str,
        output: Option<mpsc::UnboundedSender<OutputChunk>>,
    ) -> CommandResult {
        let started = Instant::now();

        if *self.kill_rx.borrow() {
            return CommandResult::launch_failure(
                command,
                self.working_dir.clone(),
                &self.user,
                "session terminated",
                0,
            );
        }

        let mut child = match self.build_command(command).group_spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(shell = %self.shell.program.display(), "Failed to launch command: {e}");
                return CommandResult::launch_failure(
                    command,
                    self.working_dir.clone(),
                    &self.user,
                    format!("failed to launch {}: {e}", self.shell.program.display()),
                    elapsed_ms(started),
                );
            }
        };

        let stdout_task = child
            .inner()
            .stdout
            .take()
            .map(|r| spawn_reader(r, OutputStream::Stdout, output.clone()));
        let stderr_task = child
            .inner()
            .stderr
            .take()
            .map(|r| spawn_reader(r, OutputStream::Stderr, output));

        let status = tokio::select! {
            status = child.wait() => status,
            () = killed(self.kill_rx.clone()) => {
                tracing::info!(command, "Terminating in-flight command");
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill process group: {e}");
                }
                child.wait().await
            }
        };

        let (stdout, mut stderr) = tokio::join!(
            collect(stdout_task, self.kill_rx.clone()),
            collect(stderr_task, self.kill_rx.clone()),
        );

        let exit_code = match status {
            Ok(status) => {
                let (code, note) = exit_code_of(status);
                if let Some(note) = note {
                    append_line(&mut stderr, &note);
                }
                code
            }
            Err(e) => {
                append_line(&mut stderr, &format!("failed to wait for command: {e}"));
                LAUNCH_FAILURE_EXIT_CODE
            }
        };

        let duration_ms = elapsed_ms(started);
        tracing::debug!(command, exit_code, duration_ms, "Command finished");

        CommandResult {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            timestamp: chrono::Utc::now(),
            working_directory: self.working_dir.clone(),
            user: self.user.clone(),
            duration_ms,
        }
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell.program);
        cmd.arg(self.shell.flag);
        #[cfg(windows)]
        cmd.raw_arg(command);
        #[cfg(not(windows))]
        cmd.arg(command);

        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in &self.hidden {
            cmd.env_remove(key);
        }
        cmd.envs(&self.overlay);
        cmd.env(NESTED_MARKER_VAR, "1");
        cmd
    }
}

fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    sink: Option<mpsc::UnboundedSender<OutputChunk>>,
) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    captured.extend_from_slice(&buf[..n]);
                    if let Some(sink) = &sink {
                        let _ = sink.send(OutputChunk {
                            stream,
                            data: buf[..n].to_vec(),
                        });
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, "Output read failed: {e}");
                    break;
                }
            }
        }
        captured
    })
}

/// Resolves once the kill switch is set; never if the switch is dropped.
async fn killed(mut kill_rx: watch::Receiver<bool>) {
    let closed = kill_rx.wait_for(|killed| *killed).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Wait for a reader to hit end-of-file.
///
/// A process that escaped the group can hold the pipe open indefinitely, so
/// after a kill the reader gets [`KILL_DRAIN_GRACE`] before it is abandoned.
async fn collect(task: Option<JoinHandle<Vec<u8>>>, kill_rx: watch::Receiver<bool>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    let bytes = tokio::select! {
        joined = &mut task => joined.unwrap_or_default(),
        () = killed(kill_rx) => {
            if let Ok(joined) = tokio::time::timeout(KILL_DRAIN_GRACE, &mut task).await {
                joined.unwrap_or_default()
            } else {
                tracing::debug!("Output pipe still open after kill; abandoning reader");
                task.abort();
                Vec::new()
            }
        }
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

fn exit_code_of(status: ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, Some(format!("terminated by signal {signal}")));
        }
    }
    (1, Some("terminated abnormally".to_string()))
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
