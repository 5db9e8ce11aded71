//! Structured-result extraction from heterogeneous worker stdout.
//!
//! Workers evolve independently of the orchestrator, so a single exact
//! output format cannot be assumed. Extraction runs an ordered fallback
//! chain, first match wins:
//!
//! 1. primary sentinel token followed by a JSON document;
//! 2. legacy sentinel token, marked [`Provenance::LegacySentinel`];
//! 3. first balanced `{...}` span anywhere in the text that is not an
//!    NDJSON progress/noise line, marked [`Provenance::BestEffort`];
//! 4. completion keywords with no JSON at all: a synthesized
//!    [`Provenance::Degraded`] result carrying a truncated excerpt;
//! 5. [`ExtractionFailure`] with a truncated excerpt.
//!
//! The chain is a migration shim. Workers that emit a versioned envelope
//! (`{"schemaVersion": 1, "payload": {...}}`) are unwrapped strictly: any
//! other version is an explicit failure, never a guess.
//!
//! Sentinel JSON may be pretty-printed across many lines (workers call
//! `json.dumps(..., indent=2)`), so documents are located with a string-
//! and escape-aware balanced-brace scan rather than line splitting.

use serde_json::Value;

use crate::core::types::{
    AnalysisPayload, AnalysisReport, ExecutionPayload, ExecutionReport, Provenance,
};
use crate::error::truncate_to;

/// Sentinel tokens for one worker mode.
#[derive(Debug, Clone, Copy)]
pub struct SentinelSet {
    pub primary: &'static str,
    pub legacy: &'static str,
}

/// Analyze-mode sentinels.
pub const ANALYZE_SENTINELS: SentinelSet = SentinelSet {
    primary: "ENHANCED_ANALYSIS_JSON:",
    legacy: "ANALYSIS_JSON:",
};

/// Execute-mode sentinels.
pub const EXECUTE_SENTINELS: SentinelSet = SentinelSet {
    primary: "EXECUTION_RESULTS_JSON:",
    legacy: "RESULTS_JSON:",
};

/// Keywords that mark a completed run whose output carried no JSON.
const COMPLETION_KEYWORDS: [&str; 4] = [
    "analysis complete",
    "execution complete",
    "execution_complete",
    "done:",
];

/// Bytes of raw stdout carried in excerpts and failures.
const EXCERPT_LIMIT_BYTES: usize = 600;

/// The only supported envelope schema version.
const SCHEMA_VERSION: i64 = 1;

/// Worker exited 0 but no structured result could be located.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ExtractionFailure {
    pub reason: String,
    /// Truncated copy of the raw stdout for diagnostics.
    pub raw_excerpt: String,
}

impl ExtractionFailure {
    fn new(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            raw_excerpt: truncate_to(text, EXCERPT_LIMIT_BYTES),
        }
    }
}

/// A JSON document located in worker stdout, plus how it was found.
#[derive(Debug, Clone)]
pub struct ExtractedDoc {
    pub value: Value,
    pub provenance: Provenance,
    /// Set only for degraded extractions, where `value` is empty.
    pub raw_excerpt: Option<String>,
}

/// Run the fallback chain over the full accumulated stdout text.
pub fn extract(text: &str, sentinels: SentinelSet) -> Result<ExtractedDoc, ExtractionFailure> {
    if let Some(value) = document_after_sentinel(text, sentinels.primary) {
        return Ok(ExtractedDoc {
            value: unwrap_envelope(value, text)?,
            provenance: Provenance::Sentinel,
            raw_excerpt: None,
        });
    }

    if let Some(value) = document_after_sentinel(text, sentinels.legacy) {
        tracing::warn!(sentinel = sentinels.legacy, "worker used legacy sentinel");
        return Ok(ExtractedDoc {
            value: unwrap_envelope(value, text)?,
            provenance: Provenance::LegacySentinel,
            raw_excerpt: None,
        });
    }

    if let Some(value) = first_json_object(text) {
        tracing::warn!("no sentinel found, using best-effort JSON extraction");
        return Ok(ExtractedDoc {
            value: unwrap_envelope(value, text)?,
            provenance: Provenance::BestEffort,
            raw_excerpt: None,
        });
    }

    let lowered = text.to_lowercase();
    if COMPLETION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        tracing::warn!("no JSON found, synthesizing degraded result from completion keywords");
        return Ok(ExtractedDoc {
            value: Value::Object(serde_json::Map::new()),
            provenance: Provenance::Degraded,
            raw_excerpt: Some(truncate_to(text, EXCERPT_LIMIT_BYTES)),
        });
    }

    Err(ExtractionFailure::new(
        "worker stdout contained no structured result",
        text,
    ))
}

/// Extract and decode an analyze-phase result.
pub fn extract_analysis(text: &str) -> Result<AnalysisReport, ExtractionFailure> {
    let doc = extract(text, ANALYZE_SENTINELS)?;
    let payload: AnalysisPayload = serde_json::from_value(doc.value)
        .map_err(|err| ExtractionFailure::new(format!("decode analysis payload: {err}"), text))?;
    Ok(AnalysisReport {
        findings: payload.findings,
        summary: payload.summary,
        provenance: doc.provenance,
        raw_excerpt: doc.raw_excerpt,
    })
}

/// Extract and decode an execute-phase result.
pub fn extract_execution(text: &str) -> Result<ExecutionReport, ExtractionFailure> {
    let doc = extract(text, EXECUTE_SENTINELS)?;
    let payload = ExecutionPayload::from_value(&doc.value)
        .map_err(|err| ExtractionFailure::new(format!("decode execution payload: {err}"), text))?;
    Ok(ExecutionReport {
        successful_actions: payload.successful_actions,
        failed_actions: payload.failed_actions,
        summary: payload.summary,
        provenance: doc.provenance,
        raw_excerpt: doc.raw_excerpt,
    })
}

/// Unwrap a `{schemaVersion, payload}` envelope, strictly.
fn unwrap_envelope(value: Value, text: &str) -> Result<Value, ExtractionFailure> {
    let Some(declared) = value.get("schemaVersion") else {
        // Bare legacy payload: accepted during the migration window.
        return Ok(value);
    };
    if declared.as_i64() != Some(SCHEMA_VERSION) {
        return Err(ExtractionFailure::new(
            format!("unsupported result schemaVersion {declared}"),
            text,
        ));
    }
    match value.get("payload") {
        Some(payload) => Ok(payload.clone()),
        None => Err(ExtractionFailure::new(
            "versioned envelope is missing its payload",
            text,
        )),
    }
}

/// Parse the JSON document immediately following `sentinel`, if any.
///
/// Returns `None` when the sentinel is absent or the document after it does
/// not parse; the caller then falls through to the next strategy.
fn document_after_sentinel(text: &str, sentinel: &str) -> Option<Value> {
    let start = text.find(sentinel)? + sentinel.len();
    let rest = text[start..].trim_start();
    let span = balanced_object_span(rest)?;
    serde_json::from_str(span).ok()
}

/// NDJSON progress/noise line prefixes. Objects on these lines are
/// telemetry, never the result, so the best-effort scan skips them.
const NOISE_LINE_PREFIXES: [&str; 3] = ["PROGRESS:", "ERROR:", "DONE:"];

/// First balanced `{...}` span anywhere in the text that parses as JSON,
/// ignoring spans that start on a known noise line.
fn first_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'{' && !on_noise_line(text, idx) {
            if let Some(span) = balanced_object_span(&text[idx..]) {
                if let Ok(value) = serde_json::from_str::<Value>(span) {
                    return Some(value);
                }
            }
        }
        idx += 1;
    }
    None
}

/// True when the `{` at byte position `idx` sits on an NDJSON noise line.
fn on_noise_line(text: &str, idx: usize) -> bool {
    let line_start = text[..idx].rfind('\n').map_or(0, |nl| nl + 1);
    let prefix = text[line_start..idx].trim_start();
    NOISE_LINE_PREFIXES
        .iter()
        .any(|noise| prefix.starts_with(noise))
}

/// The balanced `{...}` span at the start of `text`, string-aware.
///
/// Braces inside JSON strings (including escaped quotes) do not affect the
/// depth count. Returns `None` if `text` does not start with `{` or the
/// braces never balance.
fn balanced_object_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}
