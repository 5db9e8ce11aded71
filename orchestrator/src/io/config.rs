//! Orchestrator configuration (TOML file plus environment credential).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::registry::{TaskDescriptor, default_tasks};

/// Environment variable that overrides the configured API token.
pub const API_TOKEN_ENV: &str = "CANVAS_API_TOKEN";

/// Orchestrator configuration (TOML).
///
/// The file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; a missing file
/// is equivalent to an all-default file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base URL of the Canvas instance workers talk to.
    pub canvas_url: String,

    /// API token handed to workers. Overridden by `CANVAS_API_TOKEN`.
    /// Absence is rejected at invocation time, before any spawn.
    pub api_token: Option<String>,

    /// Interpreter used to run worker scripts.
    pub python_bin: String,

    /// Directory containing the worker scripts.
    pub scripts_dir: PathBuf,

    /// Wall-clock budget per worker invocation in seconds.
    pub worker_timeout_secs: u64,

    /// Truncate captured worker stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Directory for staged approved-action artifacts. Defaults to the
    /// system temp directory when unset.
    pub staging_dir: Option<PathBuf>,

    /// Task registry entries. When present, replaces the built-in list.
    #[serde(rename = "tasks")]
    pub tasks: Vec<TaskDescriptor>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            canvas_url: "https://canvas.instructure.com".to_string(),
            api_token: None,
            python_bin: "python3".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            worker_timeout_secs: 300,
            output_limit_bytes: 1_000_000,
            staging_dir: None,
            tasks: default_tasks(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.canvas_url.trim().is_empty() {
            return Err(anyhow!("canvas_url must not be empty"));
        }
        if self.python_bin.trim().is_empty() {
            return Err(anyhow!("python_bin must not be empty"));
        }
        if self.worker_timeout_secs == 0 {
            return Err(anyhow!("worker_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tasks.is_empty() {
            return Err(anyhow!("tasks must not be empty"));
        }
        Ok(())
    }

    /// Staging directory with the system-temp fallback applied.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Load config from a TOML file and apply the environment credential.
///
/// If the file is missing, returns defaults (still subject to the env
/// override and validation).
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        OrchestratorConfig::default()
    };
    apply_token_override(&mut cfg, std::env::var(API_TOKEN_ENV).ok());
    cfg.validate()?;
    Ok(cfg)
}

/// Apply the environment credential: a non-blank value replaces the
/// configured token, a blank or absent one leaves it untouched.
fn apply_token_override(cfg: &mut OrchestratorConfig, env_token: Option<String>) {
    if let Some(token) = env_token {
        if !token.trim().is_empty() {
            cfg.api_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg.worker_timeout_secs, 300);
        assert_eq!(cfg.tasks, default_tasks());
    }

    #[test]
    fn parse_overrides_and_task_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            concat!(
                "canvas_url = \"https://lms.example.edu\"\n",
                "worker_timeout_secs = 60\n",
                "\n",
                "[[tasks]]\n",
                "id = \"duplicate-pages\"\n",
                "script = \"duplicate_page_cleaner.py\"\n",
                "category = \"content\"\n",
                "execute_flag = \"execute-approved\"\n",
            ),
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.canvas_url, "https://lms.example.edu");
        assert_eq!(cfg.worker_timeout_secs, 60);
        assert_eq!(cfg.tasks.len(), 1);
    }

    #[test]
    fn env_token_overrides_file_token() {
        let mut cfg = OrchestratorConfig {
            api_token: Some("file-tok".to_string()),
            ..OrchestratorConfig::default()
        };
        apply_token_override(&mut cfg, Some("env-tok".to_string()));
        assert_eq!(cfg.api_token.as_deref(), Some("env-tok"));
    }

    #[test]
    fn blank_or_absent_env_token_keeps_file_token() {
        let mut cfg = OrchestratorConfig {
            api_token: Some("file-tok".to_string()),
            ..OrchestratorConfig::default()
        };
        apply_token_override(&mut cfg, Some("   ".to_string()));
        assert_eq!(cfg.api_token.as_deref(), Some("file-tok"));
        apply_token_override(&mut cfg, None);
        assert_eq!(cfg.api_token.as_deref(), Some("file-tok"));
    }

    #[test]
    fn env_token_sets_an_otherwise_missing_token() {
        let mut cfg = OrchestratorConfig::default();
        apply_token_override(&mut cfg, Some("env-tok".to_string()));
        assert_eq!(cfg.api_token.as_deref(), Some("env-tok"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = OrchestratorConfig {
            worker_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn staging_dir_falls_back_to_system_temp() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.staging_dir(), std::env::temp_dir());
    }
}
