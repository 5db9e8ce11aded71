//! Classification of nonzero worker exits into the stable error taxonomy.
//!
//! The mapping scans stderr for known substrings in priority order, so the
//! caller sees a normalized kind instead of coupling to a worker's exact
//! wording. Exit code 0 never reaches this module; spawn-level failures
//! (interpreter missing) are classified separately by the invoker.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{TaskError, TaskErrorKind};

fn missing_module_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"No module named '([^']+)'").expect("valid regex"))
}

/// Classify a nonzero worker exit from its code and stderr text.
pub fn classify(exit_code: i32, stderr: &str) -> TaskError {
    debug_assert_ne!(exit_code, 0);
    let lowered = stderr.to_lowercase();

    if let Some(captures) = missing_module_re().captures(stderr) {
        let module = &captures[1];
        return TaskError::new(
            TaskErrorKind::MissingDependency,
            format!("worker is missing the Python dependency '{module}'"),
        )
        .with_detail(stderr);
    }
    if lowered.contains("modulenotfounderror") || lowered.contains("importerror") {
        return TaskError::new(
            TaskErrorKind::MissingDependency,
            "worker failed to import a Python dependency",
        )
        .with_detail(stderr);
    }

    if lowered.contains("401") || lowered.contains("unauthorized") {
        return TaskError::new(
            TaskErrorKind::AuthenticationFailure,
            "platform rejected the API token (401)",
        )
        .with_detail(stderr);
    }

    if lowered.contains("403") || lowered.contains("forbidden") {
        return TaskError::new(
            TaskErrorKind::PermissionDenied,
            "API token lacks access to this course (403)",
        )
        .with_detail(stderr);
    }

    if lowered.contains("404") || lowered.contains("not found") {
        return TaskError::new(
            TaskErrorKind::NotFound,
            "course or target entity was not found (404)",
        )
        .with_detail(stderr);
    }

    if lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("connecttimeout")
        || lowered.contains("readtimeout")
    {
        return TaskError::new(
            TaskErrorKind::NetworkTimeout,
            "worker's platform requests timed out",
        )
        .with_detail(stderr);
    }

    TaskError::new(
        TaskErrorKind::WorkerFailed,
        format!("worker exited with code {exit_code}"),
    )
    .with_detail(stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_captures_dependency_name() {
        let stderr = "Traceback (most recent call last):\n  ...\nModuleNotFoundError: No module named 'requests'\n";
        let err = classify(1, stderr);
        assert_eq!(err.kind, TaskErrorKind::MissingDependency);
        assert!(err.message.contains("'requests'"));
    }

    #[test]
    fn import_error_without_name_still_classifies() {
        let err = classify(1, "ImportError: cannot import name 'Retry'");
        assert_eq!(err.kind, TaskErrorKind::MissingDependency);
    }

    #[test]
    fn unauthorized_is_authentication_failure() {
        let err = classify(1, "requests.exceptions.HTTPError: 401 Unauthorized for url");
        assert_eq!(err.kind, TaskErrorKind::AuthenticationFailure);
    }

    #[test]
    fn forbidden_is_permission_denied() {
        let err = classify(1, "HTTPError: 403 Client Error: Forbidden");
        assert_eq!(err.kind, TaskErrorKind::PermissionDenied);
    }

    #[test]
    fn not_found_is_not_found() {
        let err = classify(1, "HTTPError: 404 Client Error: Not Found for url: /courses/9");
        assert_eq!(err.kind, TaskErrorKind::NotFound);
    }

    #[test]
    fn request_timeout_is_network_timeout() {
        let err = classify(1, "requests.exceptions.ConnectTimeout: connection timed out");
        assert_eq!(err.kind, TaskErrorKind::NetworkTimeout);
    }

    #[test]
    fn missing_dependency_wins_over_http_patterns() {
        // Priority order: a dependency failure mentioning a 401 in a log
        // line is still a dependency failure.
        let stderr = "fetching 401 docs\nModuleNotFoundError: No module named 'pandas'";
        let err = classify(1, stderr);
        assert_eq!(err.kind, TaskErrorKind::MissingDependency);
    }

    #[test]
    fn unknown_stderr_is_generic_with_truncated_detail() {
        let stderr = "x".repeat(10_000);
        let err = classify(2, &stderr);
        assert_eq!(err.kind, TaskErrorKind::WorkerFailed);
        assert!(err.message.contains("code 2"));
        let detail = err.raw_detail.expect("detail");
        assert!(detail.len() < 3_000);
        assert!(detail.contains("[truncated"));
    }
}
