//! End-to-end tests for the real process path.
//!
//! These drive [`TaskService`] through [`ProcessWorkerInvoker`] with fake
//! worker shell scripts (config sets `python_bin = "sh"`), covering the
//! full lifecycle: spawn, timeout kill, stderr classification, staged
//! artifact handoff and cleanup.

use std::path::Path;

use serde_json::json;

use orchestrator::core::registry::{ExecuteFlag, TaskDescriptor};
use orchestrator::core::types::{ActionItem, Provenance};
use orchestrator::error::TaskErrorKind;
use orchestrator::io::config::OrchestratorConfig;
use orchestrator::io::invoker::ProcessWorkerInvoker;
use orchestrator::service::TaskService;
use orchestrator::test_support::write_fake_worker;

struct Harness {
    _temp: tempfile::TempDir,
    staging: std::path::PathBuf,
    service: TaskService<ProcessWorkerInvoker>,
}

/// Build a service whose single task runs `script_body` through `sh`.
fn harness(script_body: &str) -> Harness {
    harness_with_interpreter(script_body, "sh")
}

fn harness_with_interpreter(script_body: &str, interpreter: &str) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let scripts = temp.path().join("scripts");
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&scripts).expect("scripts dir");
    write_fake_worker(&scripts, "worker.sh", script_body);

    let config = OrchestratorConfig {
        api_token: Some("tok".to_string()),
        python_bin: interpreter.to_string(),
        scripts_dir: scripts,
        worker_timeout_secs: 1,
        staging_dir: Some(staging.clone()),
        tasks: vec![TaskDescriptor {
            id: "fake-check".to_string(),
            script: "worker.sh".to_string(),
            category: "content".to_string(),
            execute_flag: ExecuteFlag::ExecuteFromJson,
        }],
        ..OrchestratorConfig::default()
    };
    let invoker = ProcessWorkerInvoker {
        python_bin: config.python_bin.clone(),
        scripts_dir: config.scripts_dir.clone(),
    };
    let service = TaskService::new(config, invoker).expect("service");
    Harness {
        _temp: temp,
        staging,
        service,
    }
}

fn staging_is_empty(staging: &Path) -> bool {
    match std::fs::read_dir(staging) {
        Ok(entries) => entries.count() == 0,
        // The gate creates the directory lazily; absent means nothing staged.
        Err(_) => true,
    }
}

/// Verifies the analyze phase against a worker that mixes progress lines,
/// the sentinel document, and a human-readable summary, the way the real
/// Python workers do.
#[test]
fn analyze_extracts_findings_from_real_worker_stdout() {
    let h = harness(concat!(
        "echo 'PROGRESS: {\"step\": \"fetch_pages\", \"current\": 2, \"total\": 3}'\n",
        "echo 'ENHANCED_ANALYSIS_JSON: {\"findings\": {\"safeActions\": ",
        "[{\"page_id\": 7, \"reason\": \"duplicate of 5\"}], ",
        "\"manualReviewActions\": []}, \"summary\": {\"pages_scanned\": 3}}'\n",
        "echo '=== Analysis Summary ==='\n",
    ));

    let report = h.service.analyze("fake-check", "123").expect("analyze");
    assert_eq!(report.provenance, Provenance::Sentinel);
    assert_eq!(report.findings.safe_actions.len(), 1);
    assert_eq!(report.findings.safe_actions[0].0["page_id"], 7);
    assert_eq!(report.summary["pages_scanned"], 3);
}

/// Round-trip: the staged batch is recoverable from the artifact. The fake
/// worker locates the `--execute-from-json` argument and echoes the file
/// back as its successful-actions list.
#[test]
fn execute_round_trips_the_approved_batch_through_the_artifact() {
    let h = harness(concat!(
        "batch=''\n",
        "while [ \"$#\" -gt 0 ]; do\n",
        "  case \"$1\" in\n",
        "    --execute-from-json|--execute-approved) batch=\"$2\"; shift 2 ;;\n",
        "    *) shift ;;\n",
        "  esac\n",
        "done\n",
        "printf 'EXECUTION_RESULTS_JSON: {\"successfulActions\": %s, ",
        "\"failedActions\": [], \"summary\": {\"actions_completed\": 2}}\\n' \"$(cat \"$batch\")\"\n",
    ));

    let approved = vec![
        ActionItem(json!({"page_id": 7, "reason": "duplicate of 5"})),
        ActionItem(json!({"page_id": 9, "reason": "duplicate of 5"})),
    ];
    let report = h
        .service
        .execute_approved("fake-check", "123", &approved)
        .expect("execute");

    assert_eq!(report.successful_actions, approved);
    assert_eq!(report.summary["actions_completed"], 2);
    assert!(staging_is_empty(&h.staging));
}

/// A worker that outlives its budget is killed; the call resolves with
/// Timeout and nothing it printed is parsed.
#[test]
fn timeout_kills_worker_and_releases_the_artifact() {
    let h = harness(concat!(
        "echo 'ENHANCED_ANALYSIS_JSON: {\"findings\": {}, \"summary\": {}}'\n",
        "sleep 3\n",
    ));

    let err = h.service.analyze("fake-check", "123").expect_err("timeout");
    assert_eq!(err.kind, TaskErrorKind::Timeout);

    let approved = vec![ActionItem(json!({"id": 1, "reason": "r"}))];
    let err = h
        .service
        .execute_approved("fake-check", "123", &approved)
        .expect_err("timeout");
    assert_eq!(err.kind, TaskErrorKind::Timeout);
    assert!(staging_is_empty(&h.staging));
}

#[test]
fn worker_stderr_is_classified_and_artifact_released() {
    let h = harness(concat!(
        "echo 'HTTPError: 401 Unauthorized for url: /api/v1/courses/123' >&2\n",
        "exit 1\n",
    ));

    let err = h.service.analyze("fake-check", "123").expect_err("classified");
    assert_eq!(err.kind, TaskErrorKind::AuthenticationFailure);

    let approved = vec![ActionItem(json!({"id": 1, "reason": "r"}))];
    let err = h
        .service
        .execute_approved("fake-check", "123", &approved)
        .expect_err("classified");
    assert_eq!(err.kind, TaskErrorKind::AuthenticationFailure);
    assert!(staging_is_empty(&h.staging));
}

#[test]
fn missing_interpreter_is_a_spawn_failure() {
    let h = harness_with_interpreter("echo unused\n", "/nonexistent/python3");

    let err = h.service.analyze("fake-check", "123").expect_err("spawn");
    assert_eq!(err.kind, TaskErrorKind::SpawnFailure);

    let approved = vec![ActionItem(json!({"id": 1, "reason": "r"}))];
    let err = h
        .service
        .execute_approved("fake-check", "123", &approved)
        .expect_err("spawn");
    assert_eq!(err.kind, TaskErrorKind::SpawnFailure);
    assert!(staging_is_empty(&h.staging));
}

/// A worker exiting 0 with logs but no JSON degrades or fails depending on
/// completion keywords; with neither, the call is an extraction failure.
#[test]
fn exit_zero_without_json_is_an_extraction_failure() {
    let h = harness("echo 'could not reach a conclusion'\n");

    let err = h.service.analyze("fake-check", "123").expect_err("extract");
    assert_eq!(err.kind, TaskErrorKind::ExtractionFailed);
}

#[test]
fn exit_zero_with_completion_keyword_degrades_instead_of_failing() {
    let h = harness("echo 'Deleted 2 pages.'\necho 'Execution complete.'\n");

    let approved = vec![ActionItem(json!({"id": 1, "reason": "r"}))];
    let report = h
        .service
        .execute_approved("fake-check", "123", &approved)
        .expect("degraded");
    assert_eq!(report.provenance, Provenance::Degraded);
    assert!(report.raw_excerpt.expect("excerpt").contains("Deleted 2 pages"));
    assert!(staging_is_empty(&h.staging));
}
