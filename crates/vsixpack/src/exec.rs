//! External process execution with cancellation and output capture.
//!
//! Package manager invocations (`npm list`, `yarn info`, ...) all go through
//! [`exec`]. Output is captured on reader threads and capped; a fired
//! [`CancellationToken`] or an elapsed timeout kills the child. Retry policy,
//! if any, belongs to the caller.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default cap on captured stdout/stderr bytes.
pub const MAX_OUTPUT_BYTES: usize = 5000 * 1024;

/// How often the child is polled for exit/cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from running an external process.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed{}:\n{stderr}", exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("'{command}' produced more than {limit} bytes of output")]
    OutputLimit { command: String, limit: usize },

    #[error("'{command}' timed out after {:?}", timeout)]
    TimedOut { command: String, timeout: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Cooperative cancellation signal shared across pipeline stages.
///
/// Cloning yields a handle to the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options for a single [`exec`] call.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, layered on top of the inherited ones.
    pub env: Vec<(String, String)>,

    /// Hard wall-clock limit. `None` means no limit.
    pub timeout: Option<Duration>,

    /// Cap on captured bytes per stream.
    pub max_output: usize,

    /// Cancellation signal checked while the child runs.
    pub cancellation: Option<CancellationToken>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            timeout: None,
            max_output: MAX_OUTPUT_BYTES,
            cancellation: None,
        }
    }
}

/// Captured output of a completed process.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawn a reader thread that drains `source` into a buffer, stopping (and
/// flagging) once `limit` is exceeded.
fn capture<R: Read + Send + 'static>(
    mut source: R,
    limit: usize,
    over_limit: Arc<AtomicBool>,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buffer.len() + n > limit {
                        over_limit.store(true, Ordering::SeqCst);
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
        buffer
    })
}

/// Run `program` with `args` to completion and capture its output.
///
/// # Errors
///
/// Returns [`ExecError::Cancelled`] if the cancellation token fires before
/// the child exits (the child is killed), [`ExecError::Failed`] on non-zero
/// exit, and [`ExecError::OutputLimit`] / [`ExecError::TimedOut`] when the
/// respective cap is exceeded.
pub fn exec(program: &str, args: &[&str], options: &ExecOptions) -> Result<ExecOutput, ExecError> {
    let command_line = command_line(program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref cwd) = options.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &options.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    let (Some(child_stdout), Some(child_stderr)) = (child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        return Err(ExecError::Io {
            command: command_line,
            source: std::io::Error::other("child process pipes unavailable"),
        });
    };

    let over_limit = Arc::new(AtomicBool::new(false));
    let stdout_handle = capture(child_stdout, options.max_output, Arc::clone(&over_limit));
    let stderr_handle = capture(child_stderr, options.max_output, Arc::clone(&over_limit));

    let started = Instant::now();
    let status = loop {
        if let Some(ref token) = options.cancellation {
            if token.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::Cancelled);
            }
        }
        if let Some(timeout) = options.timeout {
            if started.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::TimedOut {
                    command: command_line,
                    timeout,
                });
            }
        }
        if over_limit.load(Ordering::SeqCst) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecError::OutputLimit {
                command: command_line,
                limit: options.max_output,
            });
        }

        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(ExecError::Io {
                    command: command_line,
                    source,
                })
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    if over_limit.load(Ordering::SeqCst) {
        return Err(ExecError::OutputLimit {
            command: command_line,
            limit: options.max_output,
        });
    }

    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if !status.success() {
        return Err(ExecError::Failed {
            command: command_line,
            exit_code: status.code(),
            stderr,
        });
    }

    Ok(ExecOutput { stdout, stderr })
}

/// Human-readable command line for error messages.
fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
