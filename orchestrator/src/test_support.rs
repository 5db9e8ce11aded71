//! Test-only helpers: scripted invokers and fake worker scripts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;

use crate::io::invoker::{WorkerInvoker, WorkerMode, WorkerRequest};
use crate::io::process::{WorkerOutput, WorkerRunError};

/// One canned invocation result.
pub enum ScriptedOutcome {
    Output(WorkerOutput),
    SpawnFailure,
    TimedOut,
}

/// A successful worker run with the given stdout.
pub fn worker_stdout(stdout: &str) -> WorkerOutput {
    WorkerOutput {
        exit_code: Some(0),
        timed_out: false,
        stdout: stdout.to_string(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
    }
}

/// A failed worker run with the given exit code and stderr.
pub fn worker_exit(code: i32, stderr: &str) -> WorkerOutput {
    WorkerOutput {
        exit_code: Some(code),
        timed_out: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
        stdout_truncated: 0,
        stderr_truncated: 0,
    }
}

/// Invoker that returns queued outcomes without spawning processes.
///
/// Records every spawn attempt and, for execute mode, whether the staged
/// artifact existed at invocation time.
pub struct ScriptedInvoker {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    spawns: AtomicUsize,
    batch_paths: Mutex<Vec<PathBuf>>,
    batch_existed: Mutex<Vec<bool>>,
}

impl ScriptedInvoker {
    pub fn single(output: WorkerOutput) -> Self {
        Self::sequence(vec![ScriptedOutcome::Output(output)])
    }

    pub fn sequence(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            spawns: AtomicUsize::new(0),
            batch_paths: Mutex::new(Vec::new()),
            batch_existed: Mutex::new(Vec::new()),
        }
    }

    /// Number of invocations seen (the spy for "no process was spawned").
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Staged artifact paths seen by execute-mode invocations.
    pub fn batch_paths(&self) -> Vec<PathBuf> {
        self.batch_paths
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// True when every execute-mode invocation saw its artifact on disk.
    pub fn batches_existed_during_invoke(&self) -> bool {
        let existed = self.batch_existed.lock().unwrap_or_else(|p| p.into_inner());
        !existed.is_empty() && existed.iter().all(|&e| e)
    }
}

impl WorkerInvoker for ScriptedInvoker {
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerOutput, WorkerRunError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if let WorkerMode::ExecuteFromBatch(path) = &request.mode {
            self.batch_existed
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(path.exists());
            self.batch_paths
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(path.clone());
        }
        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match next {
            Some(ScriptedOutcome::Output(output)) => Ok(output),
            Some(ScriptedOutcome::SpawnFailure) => Err(WorkerRunError::Spawn(
                std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            )),
            Some(ScriptedOutcome::TimedOut) => Ok(WorkerOutput {
                exit_code: None,
                timed_out: true,
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: 0,
                stderr_truncated: 0,
            }),
            None => Err(WorkerRunError::Internal(anyhow!(
                "no scripted outcome left"
            ))),
        }
    }
}

/// Write a fake worker shell script for tests that spawn real processes
/// (run it with `python_bin = "sh"`).
pub fn write_fake_worker(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write fake worker");
    path
}
