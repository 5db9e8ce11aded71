//! Worker invocation seam.
//!
//! [`WorkerInvoker`] decouples the task service from the actual worker
//! backend (Python scripts run through [`crate::io::process`]). Tests use
//! scripted invokers that return predetermined outputs without spawning.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument};

use crate::core::registry::TaskDescriptor;
use crate::io::process::{WorkerOutput, WorkerRunError, run_worker};

/// Which phase the worker runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// Read-only analysis proposing candidate actions.
    AnalyzeOnly,
    /// Apply the approved actions staged at the given artifact path.
    ExecuteFromBatch(PathBuf),
}

/// Parameters for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub descriptor: TaskDescriptor,
    pub mode: WorkerMode,
    pub canvas_url: String,
    pub api_token: String,
    pub course_id: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over worker execution backends.
pub trait WorkerInvoker {
    /// Spawn exactly one worker for the request and wait for its terminal
    /// event (exit or timeout).
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerOutput, WorkerRunError>;
}

/// Invoker that runs worker scripts through a Python interpreter.
#[derive(Debug, Clone)]
pub struct ProcessWorkerInvoker {
    pub python_bin: String,
    pub scripts_dir: PathBuf,
}

impl ProcessWorkerInvoker {
    /// Assemble the worker argv.
    ///
    /// The platform arguments are always present; the mode flag selects the
    /// phase. Execute mode uses the descriptor's flag spelling because two
    /// legacy scripts still expect `--execute-approved`.
    fn build_command(&self, request: &WorkerRequest) -> Command {
        let mut cmd = Command::new(&self.python_bin);
        cmd.arg(self.scripts_dir.join(&request.descriptor.script))
            .arg("--canvas-url")
            .arg(&request.canvas_url)
            .arg("--api-token")
            .arg(&request.api_token)
            .arg("--course-id")
            .arg(&request.course_id);
        match &request.mode {
            WorkerMode::AnalyzeOnly => {
                cmd.arg("--analyze-only");
            }
            WorkerMode::ExecuteFromBatch(path) => {
                cmd.arg(request.descriptor.execute_flag.as_arg()).arg(path);
            }
        }
        cmd
    }
}

impl WorkerInvoker for ProcessWorkerInvoker {
    #[instrument(skip_all, fields(task = %request.descriptor.id, course = %request.course_id))]
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerOutput, WorkerRunError> {
        let analyze = matches!(request.mode, WorkerMode::AnalyzeOnly);
        info!(script = %request.descriptor.script, analyze, "starting worker");
        run_worker(
            self.build_command(request),
            request.timeout,
            request.output_limit_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{ExecuteFlag, TaskDescriptor};

    fn descriptor(execute_flag: ExecuteFlag) -> TaskDescriptor {
        TaskDescriptor {
            id: "duplicate-pages".to_string(),
            script: "duplicate_page_cleaner.py".to_string(),
            category: "content".to_string(),
            execute_flag,
        }
    }

    fn request(mode: WorkerMode, execute_flag: ExecuteFlag) -> WorkerRequest {
        WorkerRequest {
            descriptor: descriptor(execute_flag),
            mode,
            canvas_url: "https://lms.example.edu".to_string(),
            api_token: "tok".to_string(),
            course_id: "123".to_string(),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1_000,
        }
    }

    fn argv(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn analyze_argv_carries_platform_args_and_mode_flag() {
        let invoker = ProcessWorkerInvoker {
            python_bin: "python3".to_string(),
            scripts_dir: PathBuf::from("/opt/scripts"),
        };
        let cmd = invoker.build_command(&request(WorkerMode::AnalyzeOnly, ExecuteFlag::default()));
        let args = argv(&cmd);
        assert_eq!(args[0], "/opt/scripts/duplicate_page_cleaner.py");
        assert_eq!(args[1..7], [
            "--canvas-url",
            "https://lms.example.edu",
            "--api-token",
            "tok",
            "--course-id",
            "123"
        ]);
        assert_eq!(args[7], "--analyze-only");
    }

    #[test]
    fn execute_argv_uses_descriptor_flag_spelling() {
        let invoker = ProcessWorkerInvoker {
            python_bin: "python3".to_string(),
            scripts_dir: PathBuf::from("scripts"),
        };
        let batch = PathBuf::from("/tmp/approved_actions_123.json");
        let cmd = invoker.build_command(&request(
            WorkerMode::ExecuteFromBatch(batch.clone()),
            ExecuteFlag::ExecuteApproved,
        ));
        let args = argv(&cmd);
        assert_eq!(args[7], "--execute-approved");
        assert_eq!(args[8], batch.to_string_lossy());
    }
}
