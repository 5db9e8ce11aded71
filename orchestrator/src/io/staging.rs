//! Staging of approved action batches for execute-mode workers.
//!
//! An approved batch is serialized to a uniquely named transient artifact
//! that exactly one worker invocation consumes. The artifact must never
//! outlive that invocation: [`StagedBatch`] deletes the file on
//! [`StagedBatch::release`] or on `Drop`, so every exit path (success,
//! worker failure, timeout, panic) releases it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::ActionItem;

/// Creates and releases staged-action artifacts in one directory.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    staging_dir: PathBuf,
}

impl ApprovalGate {
    pub fn new(staging_dir: PathBuf) -> Self {
        Self { staging_dir }
    }

    /// Serialize an approved batch to a new uniquely named artifact.
    ///
    /// Returns `None` for an empty batch: the caller must then skip the
    /// worker invocation entirely. Uniqueness comes from the course id plus
    /// nanosecond timestamp; the file is opened with `create_new` so a
    /// collision between concurrent callers fails closed instead of
    /// silently sharing an artifact.
    #[instrument(skip_all, fields(course = %course_id, actions = batch.len()))]
    pub fn stage(&self, course_id: &str, batch: &[ActionItem]) -> Result<Option<StagedBatch>> {
        if batch.is_empty() {
            debug!("empty batch, nothing staged");
            return Ok(None);
        }

        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("create staging dir {}", self.staging_dir.display()))?;

        let mut payload =
            serde_json::to_string_pretty(batch).context("serialize approved batch")?;
        payload.push('\n');

        let course = sanitize_component(course_id);
        for attempt in 0..3 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system clock before epoch")?
                .as_nanos();
            let path = self
                .staging_dir
                .join(format!("approved_actions_{course}_{nanos}_{attempt}.json"));
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(payload.as_bytes())
                        .with_context(|| format!("write staged batch {}", path.display()))?;
                    debug!(path = %path.display(), "staged approved batch");
                    return Ok(Some(StagedBatch {
                        path,
                        released: false,
                    }));
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("stage batch {}", path.display()));
                }
            }
        }
        Err(anyhow!("could not create a unique staged artifact"))
    }
}

/// Exclusive handle to one staged artifact.
///
/// Owned by the single execute-mode invocation that created it; no other
/// invocation may reference the path.
#[derive(Debug)]
pub struct StagedBatch {
    path: PathBuf,
    released: bool,
}

impl StagedBatch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the artifact, consuming the handle.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
            .with_context(|| format!("remove staged batch {}", self.path.display()))
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), err = %err, "failed to remove staged batch");
            }
        }
    }
}

/// Keep course ids filesystem-safe in artifact names.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
