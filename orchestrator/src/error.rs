//! Caller-facing error taxonomy for task invocations.
//!
//! Every failure a caller can observe is a [`TaskError`] with a stable
//! [`TaskErrorKind`]. Internal plumbing uses `anyhow` and is mapped to
//! `Internal` at the service boundary. Raw worker output attached for
//! diagnostics is always truncated, never passed through unbounded.

use serde::Serialize;

/// Maximum bytes of raw worker stderr/stdout carried in a `TaskError`.
pub const MAX_RAW_DETAIL_BYTES: usize = 2_000;

/// Stable failure classification for one task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Missing task id, course id, or credential. Detected before any spawn.
    InvalidInput,
    /// Task id not present in the registry. Detected before any spawn.
    UnknownTask,
    /// Another invocation for the same (course, task) is still running.
    TaskBusy,
    /// Worker interpreter or script could not be started at all.
    SpawnFailure,
    /// Worker exceeded its wall-clock budget and was killed.
    Timeout,
    /// Worker aborted because a Python dependency was not importable.
    MissingDependency,
    /// Platform rejected the credential (401 pattern).
    AuthenticationFailure,
    /// Credential valid but lacks access to the course (403 pattern).
    PermissionDenied,
    /// Course or target entity does not exist (404 pattern).
    NotFound,
    /// Worker's own platform requests timed out.
    NetworkTimeout,
    /// Worker exited nonzero for a reason we could not classify further.
    WorkerFailed,
    /// Worker exited 0 but produced no parseable structured result.
    ExtractionFailed,
    /// Orchestrator-side fault (filesystem, serialization, reader threads).
    Internal,
}

impl TaskErrorKind {
    /// Wire name used in the failure envelope's `errorKind` field.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskErrorKind::InvalidInput => "invalid_input",
            TaskErrorKind::UnknownTask => "unknown_task",
            TaskErrorKind::TaskBusy => "task_busy",
            TaskErrorKind::SpawnFailure => "spawn_failure",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::MissingDependency => "missing_dependency",
            TaskErrorKind::AuthenticationFailure => "authentication_failure",
            TaskErrorKind::PermissionDenied => "permission_denied",
            TaskErrorKind::NotFound => "not_found",
            TaskErrorKind::NetworkTimeout => "network_timeout",
            TaskErrorKind::WorkerFailed => "worker_failed",
            TaskErrorKind::ExtractionFailed => "extraction_failed",
            TaskErrorKind::Internal => "internal",
        }
    }
}

/// A classified, terminal failure for one task invocation.
///
/// No kind is ever retried automatically by the orchestrator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    /// Truncated raw worker output for diagnostics.
    pub raw_detail: Option<String>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_detail: None,
        }
    }

    /// Attach a truncated copy of raw worker output.
    pub fn with_detail(mut self, detail: &str) -> Self {
        if !detail.trim().is_empty() {
            self.raw_detail = Some(truncate_detail(detail));
        }
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidInput, message)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::new(TaskErrorKind::Internal, format!("{err:#}"))
    }
}

/// Truncate raw detail to [`MAX_RAW_DETAIL_BYTES`].
pub fn truncate_detail(text: &str) -> String {
    truncate_to(text, MAX_RAW_DETAIL_BYTES)
}

/// Truncate to at most `limit` bytes, backing up to a char boundary.
pub fn truncate_to(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}
