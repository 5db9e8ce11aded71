//! Caller-facing task service: analyze and execute-approved operations.
//!
//! Composes the registry, approval gate, and worker invoker. Ordering of
//! gates is fixed: input validation, credential check, registry lookup, and
//! the per-(course, task) in-flight guard all run before any side effect;
//! only then is an artifact staged or a worker spawned.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::classifier::classify;
use crate::core::extractor::{extract_analysis, extract_execution};
use crate::core::registry::{TaskDescriptor, TaskRegistry};
use crate::core::types::{ActionItem, AnalysisReport, ExecutionReport};
use crate::error::{TaskError, TaskErrorKind};
use crate::io::config::OrchestratorConfig;
use crate::io::invoker::{WorkerInvoker, WorkerMode, WorkerRequest};
use crate::io::process::{WorkerOutput, WorkerRunError};
use crate::io::staging::ApprovalGate;

/// Orchestrates quality-check task invocations against one platform.
pub struct TaskService<I> {
    config: OrchestratorConfig,
    registry: TaskRegistry,
    gate: ApprovalGate,
    invoker: I,
    /// (course id, task id) pairs with a worker currently running. Guards
    /// against overlapping invocations for the same logical unit of work.
    in_flight: Mutex<HashSet<(String, String)>>,
}

impl<I: WorkerInvoker> TaskService<I> {
    pub fn new(config: OrchestratorConfig, invoker: I) -> Result<Self, TaskError> {
        config
            .validate()
            .map_err(|err| TaskError::invalid_input(format!("invalid config: {err:#}")))?;
        let registry = TaskRegistry::build(config.tasks.clone())
            .map_err(|err| TaskError::invalid_input(format!("invalid task list: {err:#}")))?;
        let gate = ApprovalGate::new(config.staging_dir());
        Ok(Self {
            config,
            registry,
            gate,
            invoker,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Phase 1: run a worker in analyze mode and return its findings.
    #[instrument(skip(self), fields(task = task_id, course = course_id))]
    pub fn analyze(&self, task_id: &str, course_id: &str) -> Result<AnalysisReport, TaskError> {
        let (descriptor, api_token) = self.validate_request(task_id, course_id)?;
        let _running = self.mark_in_flight(task_id, course_id)?;

        let request = self.worker_request(descriptor, WorkerMode::AnalyzeOnly, api_token, course_id);
        let output = self.invoke(&request)?;
        let report = self.finish_analysis(output)?;
        info!(
            safe = report.findings.safe_actions.len(),
            manual = report.findings.manual_review_actions.len(),
            provenance = ?report.provenance,
            "analysis complete"
        );
        Ok(report)
    }

    /// Phase 2: stage the approved subset and run a worker in execute mode.
    ///
    /// The staged artifact is deleted after the worker terminates on every
    /// path: success, classified failure, extraction failure, and timeout.
    #[instrument(skip(self, approved), fields(task = task_id, course = course_id, approved = approved.len()))]
    pub fn execute_approved(
        &self,
        task_id: &str,
        course_id: &str,
        approved: &[ActionItem],
    ) -> Result<ExecutionReport, TaskError> {
        let (descriptor, api_token) = self.validate_request(task_id, course_id)?;
        if approved.is_empty() {
            info!("empty approved batch, nothing to execute");
            return Ok(ExecutionReport::empty());
        }
        let _running = self.mark_in_flight(task_id, course_id)?;

        let Some(staged) = self
            .gate
            .stage(course_id, approved)
            .map_err(TaskError::internal)?
        else {
            return Ok(ExecutionReport::empty());
        };

        let request = self.worker_request(
            descriptor,
            WorkerMode::ExecuteFromBatch(staged.path().to_path_buf()),
            api_token,
            course_id,
        );
        let outcome = self
            .invoke(&request)
            .and_then(|output| self.finish_execution(output));

        // The artifact is single-use; `staged` would also delete it on
        // Drop, but an explicit release surfaces removal problems.
        if let Err(err) = staged.release() {
            warn!(err = %err, "failed to release staged batch");
        }

        let report = outcome?;
        info!(
            successful = report.successful_actions.len(),
            failed = report.failed_actions.len(),
            provenance = ?report.provenance,
            "execution complete"
        );
        Ok(report)
    }

    /// Gates that must pass before any side effect.
    fn validate_request(
        &self,
        task_id: &str,
        course_id: &str,
    ) -> Result<(TaskDescriptor, String), TaskError> {
        if task_id.trim().is_empty() {
            return Err(TaskError::invalid_input("task id must not be empty"));
        }
        if course_id.trim().is_empty() {
            return Err(TaskError::invalid_input("course id must not be empty"));
        }
        let api_token = self
            .config
            .api_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                TaskError::invalid_input(
                    "missing API token (set CANVAS_API_TOKEN or api_token in config)",
                )
            })?
            .to_string();
        let descriptor = self
            .registry
            .lookup(task_id)
            .cloned()
            .ok_or_else(|| {
                TaskError::new(TaskErrorKind::UnknownTask, format!("unknown task '{task_id}'"))
            })?;
        Ok((descriptor, api_token))
    }

    fn worker_request(
        &self,
        descriptor: TaskDescriptor,
        mode: WorkerMode,
        api_token: String,
        course_id: &str,
    ) -> WorkerRequest {
        WorkerRequest {
            descriptor,
            mode,
            canvas_url: self.config.canvas_url.clone(),
            api_token,
            course_id: course_id.to_string(),
            timeout: Duration::from_secs(self.config.worker_timeout_secs),
            output_limit_bytes: self.config.output_limit_bytes,
        }
    }

    fn mark_in_flight(&self, task_id: &str, course_id: &str) -> Result<InFlightGuard<'_>, TaskError> {
        let key = (course_id.to_string(), task_id.to_string());
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(key.clone()) {
            return Err(TaskError::new(
                TaskErrorKind::TaskBusy,
                format!("task '{task_id}' is already running for course {course_id}"),
            ));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            key,
        })
    }

    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerOutput, TaskError> {
        match self.invoker.invoke(request) {
            Ok(output) if output.timed_out => Err(TaskError::new(
                TaskErrorKind::Timeout,
                format!(
                    "worker exceeded its {}s budget and was terminated",
                    request.timeout.as_secs()
                ),
            )),
            Ok(output) => Ok(output),
            Err(WorkerRunError::Spawn(err)) => Err(TaskError::new(
                TaskErrorKind::SpawnFailure,
                format!("could not start worker: {err}"),
            )),
            Err(WorkerRunError::Internal(err)) => Err(TaskError::internal(err)),
        }
    }

    fn finish_analysis(&self, output: WorkerOutput) -> Result<AnalysisReport, TaskError> {
        match output.exit_code {
            Some(0) => extract_analysis(&output.stdout).map_err(|failure| {
                TaskError::new(TaskErrorKind::ExtractionFailed, failure.reason)
                    .with_detail(&failure.raw_excerpt)
            }),
            Some(code) => Err(classify(code, &output.stderr)),
            None => Err(TaskError::new(
                TaskErrorKind::WorkerFailed,
                "worker was terminated by a signal",
            )
            .with_detail(&output.stderr)),
        }
    }

    fn finish_execution(&self, output: WorkerOutput) -> Result<ExecutionReport, TaskError> {
        match output.exit_code {
            Some(0) => extract_execution(&output.stdout).map_err(|failure| {
                TaskError::new(TaskErrorKind::ExtractionFailed, failure.reason)
                    .with_detail(&failure.raw_excerpt)
            }),
            Some(code) => Err(classify(code, &output.stderr)),
            None => Err(TaskError::new(
                TaskErrorKind::WorkerFailed,
                "worker was terminated by a signal",
            )
            .with_detail(&output.stderr)),
        }
    }
}

/// Removes its (course, task) key from the in-flight set on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<(String, String)>>,
    key: (String, String),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.key);
    }
}

/// Failure envelope diagnostics block.
#[derive(Debug, Serialize)]
pub struct DebugInfo {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "courseId")]
    pub course_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(rename = "errorKind")]
    pub error_kind: &'static str,
}

impl DebugInfo {
    pub fn new(task_id: &str, course_id: &str, err: &TaskError) -> Self {
        Self {
            task_id: task_id.to_string(),
            course_id: course_id.to_string(),
            timestamp: epoch_millis(),
            error_kind: err.kind.as_str(),
        }
    }
}

/// Caller-facing response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "rawDetail", skip_serializing_if = "Option::is_none")]
    pub raw_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            raw_detail: None,
            debug: None,
        }
    }

    pub fn failure(err: &TaskError, debug: Option<DebugInfo>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(err.message.clone()),
            raw_detail: err.raw_detail.clone(),
            debug,
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
