//! Immutable task registry mapping task ids to worker scripts.
//!
//! Built once at startup from validated configuration and never mutated
//! afterwards. Lookup failing closed for unknown ids is the first
//! validation gate: no process is ever spawned for an unregistered task.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which execute-mode flag spelling a worker script understands.
///
/// Newer scripts take `--execute-from-json <path>`; two older scripts still
/// expect `--execute-approved <path>`. Both are kept through the migration
/// window and recorded per descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecuteFlag {
    #[default]
    ExecuteFromJson,
    ExecuteApproved,
}

impl ExecuteFlag {
    pub fn as_arg(self) -> &'static str {
        match self {
            ExecuteFlag::ExecuteFromJson => "--execute-from-json",
            ExecuteFlag::ExecuteApproved => "--execute-approved",
        }
    }
}

/// Static description of one quality-check task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Stable task identifier used by callers.
    pub id: String,
    /// Worker script filename, resolved against the configured scripts dir.
    pub script: String,
    /// Display grouping (accessibility, content, structure, settings).
    pub category: String,
    #[serde(default)]
    pub execute_flag: ExecuteFlag,
}

/// Read-only task table. Safe for unlimited concurrent reads.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDescriptor>,
}

impl TaskRegistry {
    /// Build a registry from a configuration list, validating descriptors.
    pub fn build(descriptors: Vec<TaskDescriptor>) -> Result<Self> {
        let mut tasks = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.id.trim().is_empty() {
                return Err(anyhow!("task descriptor with empty id"));
            }
            if descriptor.script.trim().is_empty() {
                return Err(anyhow!("task '{}' has an empty script", descriptor.id));
            }
            if tasks
                .insert(descriptor.id.clone(), descriptor.clone())
                .is_some()
            {
                return Err(anyhow!("duplicate task id '{}'", descriptor.id));
            }
        }
        Ok(Self { tasks })
    }

    pub fn lookup(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(task_id)
    }

    /// Descriptors in stable (lexicographic id) order.
    pub fn descriptors(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Built-in task list mirroring the deployed worker scripts.
///
/// Configuration `[[tasks]]` entries replace this list wholesale.
pub fn default_tasks() -> Vec<TaskDescriptor> {
    fn task(id: &str, script: &str, category: &str, execute_flag: ExecuteFlag) -> TaskDescriptor {
        TaskDescriptor {
            id: id.to_string(),
            script: script.to_string(),
            category: category.to_string(),
            execute_flag,
        }
    }

    vec![
        task(
            "alt-text",
            "alt_text_compliance_checker.py",
            "accessibility",
            ExecuteFlag::ExecuteApproved,
        ),
        task(
            "figcaptions",
            "figcaption_compliance_checker.py",
            "accessibility",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "transcript-buttons",
            "transcript_button_compliance_checker.py",
            "accessibility",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "table-captions",
            "table_caption_checker.py",
            "accessibility",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "duplicate-pages",
            "duplicate_page_cleaner.py",
            "content",
            ExecuteFlag::ExecuteApproved,
        ),
        task(
            "title-alignment",
            "title_alignment_checker.py",
            "content",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "syllabus-attribution",
            "syllabus_acuo_attribution_remover.py",
            "content",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "empty-groups-modules",
            "empty_groups_modules_cleaner.py",
            "structure",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "assignment-settings",
            "assignment_settings_validator.py",
            "settings",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "assessment-dates",
            "assessment_date_updater.py",
            "settings",
            ExecuteFlag::ExecuteFromJson,
        ),
        task(
            "rubric-cleanup",
            "rubric_cleanup_analyzer.py",
            "settings",
            ExecuteFlag::ExecuteFromJson,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_default_registry_and_lookup() {
        let registry = TaskRegistry::build(default_tasks()).expect("build");
        let descriptor = registry.lookup("duplicate-pages").expect("known id");
        assert_eq!(descriptor.script, "duplicate_page_cleaner.py");
        assert_eq!(descriptor.execute_flag, ExecuteFlag::ExecuteApproved);
    }

    #[test]
    fn lookup_unknown_id_fails_closed() {
        let registry = TaskRegistry::build(default_tasks()).expect("build");
        assert!(registry.lookup("no-such-task").is_none());
    }

    #[test]
    fn build_rejects_duplicate_ids() {
        let mut tasks = default_tasks();
        tasks.push(tasks[0].clone());
        let err = TaskRegistry::build(tasks).expect_err("duplicate must fail");
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn build_rejects_empty_fields() {
        let tasks = vec![TaskDescriptor {
            id: " ".to_string(),
            script: "x.py".to_string(),
            category: "content".to_string(),
            execute_flag: ExecuteFlag::default(),
        }];
        assert!(TaskRegistry::build(tasks).is_err());
    }

    #[test]
    fn descriptors_iterate_in_stable_order() {
        let registry = TaskRegistry::build(default_tasks()).expect("build");
        let ids: Vec<&str> = registry.descriptors().map(|d| d.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
