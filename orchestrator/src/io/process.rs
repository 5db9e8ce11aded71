//! Running worker child processes with timeouts and bounded output.
//!
//! One child per call. Stdout and stderr are drained on reader threads
//! while the child runs (avoiding pipe deadlocks) and byte-limited in
//! memory. The call races process exit against the wall-clock timeout; on
//! expiry the child is killed, reaped, and all buffered output is discarded
//! so nothing produced by a killed worker is ever parsed. Every exit path
//! joins the reader threads and reaps the child.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of one worker invocation.
#[derive(Debug)]
pub struct WorkerOutput {
    /// Exit code, `None` if the child was killed by a signal.
    pub exit_code: Option<i32>,
    /// True when the wall-clock budget expired and the child was killed.
    /// Stdout/stderr are empty in that case.
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

/// Why a worker invocation could not produce a [`WorkerOutput`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerRunError {
    /// The interpreter or script could not be started at all. Distinct
    /// from a nonzero exit: nothing ran.
    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),
    /// Orchestrator-side fault while supervising the child.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Spawn one worker and wait for exit or timeout, whichever fires first.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_worker(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<WorkerOutput, WorkerRunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning worker process");
    let mut child = cmd.spawn().map_err(WorkerRunError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(timeout_secs = timeout.as_secs(), "worker timed out, killing");
            abort_worker(&mut child, stdout_handle, stderr_handle);
            return Ok(WorkerOutput {
                exit_code: None,
                timed_out: true,
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: 0,
                stderr_truncated: 0,
            });
        }
        Err(err) => {
            // Supervision fault. The child must still be killed and reaped
            // and the readers joined before the error propagates.
            abort_worker(&mut child, stdout_handle, stderr_handle);
            return Err(WorkerRunError::Internal(
                anyhow::Error::new(err).context("wait for worker"),
            ));
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "worker output truncated");
    }

    debug!(exit_code = ?status.code(), "worker finished");
    Ok(WorkerOutput {
        exit_code: status.code(),
        timed_out: false,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stdout_truncated,
        stderr_truncated,
    })
}

/// Kill and reap the child and join the reader threads, discarding their
/// buffers. Killed workers are not trusted to have produced partial valid
/// results.
fn abort_worker(
    child: &mut std::process::Child,
    stdout_handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
    stderr_handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
) {
    if let Err(err) = child.kill() {
        warn!(err = %err, "failed to kill worker");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap worker after kill");
    }
    let _ = join_output(stdout_handle);
    let _ = join_output(stderr_handle);
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read worker output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let output = run_worker(
            sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn timeout_kills_child_and_discards_output() {
        let output = run_worker(
            sh("echo early; exec sleep 5"),
            Duration::from_millis(200),
            10_000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let err = run_worker(
            Command::new("definitely-not-a-real-interpreter"),
            Duration::from_secs(1),
            10_000,
        )
        .expect_err("spawn must fail");
        assert!(matches!(err, WorkerRunError::Spawn(_)));
    }

    #[test]
    fn output_beyond_limit_is_counted_not_stored() {
        let output = run_worker(
            sh("printf 'aaaaaaaaaa'"),
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, "aaaa");
        assert_eq!(output.stdout_truncated, 6);
    }
}
