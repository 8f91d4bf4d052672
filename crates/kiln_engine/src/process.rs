//! External process execution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecError;

/// Appended to a stream that was cut at `max_output` bytes.
pub const TRUNCATED_MARKER: &str = "\n[Truncated]";

/// Options for one process invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Directories joined into `LD_LIBRARY_PATH`.
    pub ld_path: Vec<PathBuf>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Data written to the process's stdin. `None` attaches `/dev/null`.
    pub stdin: Option<String>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
    /// Per-stream capture bound in bytes. `None` keeps everything.
    pub max_output: Option<usize>,
}

/// What a finished (or killed) process produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; -1 when killed by a signal or the timeout.
    pub code: i32,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
    /// Whether the timeout fired.
    pub timed_out: bool,
    /// Whether either stream was truncated.
    pub truncated: bool,
    /// Wall time from spawn to exit.
    pub exec_time: Duration,
}

/// Runs external programs.
///
/// A process that starts and exits non-zero is a successful `exec`; only a
/// failure to start or talk to it is an [`ExecError`].
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Runs `exe` with `args` and waits for it to finish.
    async fn exec(
        &self,
        exe: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError>;
}

/// [`ProcessExecutor`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessExecutor;

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn exec(
        &self,
        exe: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        if !opts.ld_path.is_empty() {
            let joined = opts
                .ld_path
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(":");
            cmd.env("LD_LIBRARY_PATH", joined);
        }
        cmd.envs(&opts.env);

        debug!(exe, args = ?args, "spawning process");
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            exe: exe.to_string(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (opts.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                // A child that exits without reading its input closes the pipe.
                let _ = pipe.write_all(input.as_bytes()).await;
            });
        }

        let wait = child.wait_with_output();
        let output = match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(output) => output,
                Err(_) => {
                    debug!(exe, ?limit, "process timed out");
                    return Ok(ExecOutput {
                        code: -1,
                        stderr: format!("<Process killed after {}ms>", limit.as_millis()),
                        timed_out: true,
                        exec_time: start.elapsed(),
                        ..ExecOutput::default()
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|source| ExecError::Io {
            exe: exe.to_string(),
            source,
        })?;

        let (stdout, cut_out) = capture(&output.stdout, opts.max_output);
        let (stderr, cut_err) = capture(&output.stderr, opts.max_output);
        Ok(ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
            truncated: cut_out || cut_err,
            exec_time: start.elapsed(),
        })
    }
}

/// Decodes a captured stream, cutting it at `limit` bytes on a char boundary.
fn capture(bytes: &[u8], limit: Option<usize>) -> (String, bool) {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    match limit {
        Some(limit) if text.len() > limit => {
            let mut end = limit;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str(TRUNCATED_MARKER);
            (text, true)
        }
        _ => (text, false),
    }
}
