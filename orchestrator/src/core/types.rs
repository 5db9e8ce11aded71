//! Shared result types for task invocations.
//!
//! These types define the stable contract between the orchestrator and its
//! callers. Worker-owned structures ([`ActionItem`]) stay opaque: the
//! orchestrator carries them verbatim and never depends on their fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One candidate action proposed by a worker.
///
/// The schema is owned by the worker (it must at least carry a
/// human-readable `reason` and enough identifying fields to re-locate the
/// target entity in execute mode). The orchestrator round-trips the value
/// byte-for-byte and never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionItem(pub Value);

/// How the structured result was located inside worker stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Primary sentinel token followed by a JSON document.
    Sentinel,
    /// Legacy sentinel token. Worker should be migrated.
    LegacySentinel,
    /// First balanced `{...}` span in otherwise unstructured text.
    BestEffort,
    /// No JSON found; result synthesized from completion keywords.
    Degraded,
    /// No worker ran; the orchestrator synthesized the report itself
    /// (empty approved batch).
    Skipped,
}

/// Analyze-mode findings, split by risk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Findings {
    /// Actions the worker judged safe to apply without review.
    #[serde(rename = "safeActions", alias = "safe_actions", default)]
    pub safe_actions: Vec<ActionItem>,
    /// Actions that need a human decision before execute mode.
    #[serde(
        rename = "manualReviewActions",
        alias = "manual_review_actions",
        alias = "requires_manual_review",
        default
    )]
    pub manual_review_actions: Vec<ActionItem>,
}

/// Result of one analyze-phase invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub findings: Findings,
    /// Opaque scalar counters reported by the worker.
    pub summary: Map<String, Value>,
    pub provenance: Provenance,
    /// Present only for degraded extractions: a truncated stdout excerpt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_excerpt: Option<String>,
}

/// Result of one execute-phase invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    #[serde(rename = "successfulActions")]
    pub successful_actions: Vec<ActionItem>,
    #[serde(rename = "failedActions")]
    pub failed_actions: Vec<ActionItem>,
    pub summary: Map<String, Value>,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_excerpt: Option<String>,
}

impl ExecutionReport {
    /// Trivial success for an empty approved batch: nothing was spawned.
    pub fn empty() -> Self {
        Self {
            successful_actions: Vec::new(),
            failed_actions: Vec::new(),
            summary: Map::new(),
            provenance: Provenance::Skipped,
            raw_excerpt: None,
        }
    }
}

/// Wire shape of an analyze-phase payload.
///
/// Workers emit `findings` plus `summary`; both default to empty so a
/// best-effort extraction of a partial document still decodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisPayload {
    #[serde(default)]
    pub findings: Findings,
    #[serde(default)]
    pub summary: Map<String, Value>,
}

/// Wire shape of an execute-phase payload.
///
/// Current workers emit `successfulActions`/`failedActions` at the top
/// level. Legacy workers used per-task spellings (`successful_deletions`,
/// `successful_fixes`, bare `successful`) and sometimes nested the lists
/// under a `results` object; [`ExecutionPayload::from_value`] absorbs all
/// of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionPayload {
    #[serde(
        rename = "successfulActions",
        alias = "successful_actions",
        alias = "successful_deletions",
        alias = "successful_fixes",
        alias = "successful",
        default
    )]
    pub successful_actions: Vec<ActionItem>,
    #[serde(
        rename = "failedActions",
        alias = "failed_actions",
        alias = "failed_deletions",
        alias = "failed_fixes",
        alias = "failed",
        default
    )]
    pub failed_actions: Vec<ActionItem>,
    #[serde(default)]
    pub summary: Map<String, Value>,
}

impl ExecutionPayload {
    /// Decode an execution payload, looking under a legacy `results`
    /// object when the top level carries no action lists.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let mut payload: ExecutionPayload = serde_json::from_value(value.clone())?;
        if payload.successful_actions.is_empty() && payload.failed_actions.is_empty() {
            if let Some(results) = value.get("results").filter(|v| v.is_object()) {
                let nested: ExecutionPayload = serde_json::from_value(results.clone())?;
                payload.successful_actions = nested.successful_actions;
                payload.failed_actions = nested.failed_actions;
            }
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn findings_accept_canonical_names() {
        let findings: Findings = serde_json::from_value(json!({
            "safeActions": [{"id": 1, "reason": "r"}],
            "manualReviewActions": []
        }))
        .expect("decode");
        assert_eq!(findings.safe_actions.len(), 1);
        assert_eq!(findings.safe_actions[0].0["id"], 1);
    }

    #[test]
    fn findings_accept_legacy_python_names() {
        let findings: Findings = serde_json::from_value(json!({
            "safe_actions": [{"reason": "dup"}],
            "requires_manual_review": [{"reason": "conflict"}]
        }))
        .expect("decode");
        assert_eq!(findings.safe_actions.len(), 1);
        assert_eq!(findings.manual_review_actions.len(), 1);
    }

    #[test]
    fn execution_payload_accepts_legacy_deletion_names() {
        let payload = ExecutionPayload::from_value(&json!({
            "successful_deletions": [{"page_id": 9}],
            "failed_deletions": [],
            "summary": {"actions_completed": 1}
        }))
        .expect("decode");
        assert_eq!(payload.successful_actions.len(), 1);
        assert_eq!(payload.summary["actions_completed"], 1);
    }

    #[test]
    fn execution_payload_reads_nested_results_object() {
        let payload = ExecutionPayload::from_value(&json!({
            "summary": {"successful": 2, "failed": 1},
            "results": {
                "successful_fixes": [{"id": 1}, {"id": 2}],
                "failed_fixes": [{"id": 3}]
            }
        }))
        .expect("decode");
        assert_eq!(payload.successful_actions.len(), 2);
        assert_eq!(payload.failed_actions.len(), 1);
    }

    #[test]
    fn empty_report_is_marked_skipped() {
        let report = ExecutionReport::empty();
        assert_eq!(report.provenance, Provenance::Skipped);
        assert!(report.successful_actions.is_empty());
        assert!(report.failed_actions.is_empty());
    }

    #[test]
    fn action_item_round_trips_verbatim() {
        let raw = json!({"page_id": 7, "reason": "duplicate of 5", "extra": ["x"]});
        let item: ActionItem = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(serde_json::to_value(&item).expect("encode"), raw);
    }
}
