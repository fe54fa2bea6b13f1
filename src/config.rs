//! Configuration management for the ralph-ollama loop engine.
//!
//! Settings live in `<project>/.ralph/settings.json`. Every section and field
//! has a serde default, so a partial file (or no file at all) yields a working
//! configuration.

use crate::error::{RalphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directories skipped by the file tracker
pub fn default_ignore_dirs() -> Vec<String> {
    [
        ".git",
        "__pycache__",
        "venv",
        ".venv",
        "node_modules",
        ".cursor",
        "state",
        "target",
        ".ralph",
        ".pytest_cache",
        ".mypy_cache",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Default binary extensions skipped by the file tracker
pub fn default_ignore_extensions() -> Vec<String> {
    ["pyc", "pyo", "pyd", "so", "dylib", "dll", "exe", "o", "class"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Retry and failure-tolerance knobs.
///
/// # Example settings.json
///
/// ```json
/// {
///   "retry": {
///     "max_retries": 3,
///     "retry_delay_secs": 1.5,
///     "continue_on_non_critical": false
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts per phase (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for linear backoff, in seconds (default: 2.0).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,

    /// Downgrade exhausted non-critical failures to warnings (default: true).
    #[serde(default = "default_true")]
    pub continue_on_non_critical: bool,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            continue_on_non_critical: true,
        }
    }
}

impl RetryConfig {
    /// Base delay as a `Duration`.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs.max(0.0))
    }
}

/// Generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Backend name. Only "ollama" is supported.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Default model when no task-specific model is configured.
    #[serde(default = "default_model")]
    pub model: String,

    /// Ollama host, exported as `OLLAMA_HOST` to the CLI.
    #[serde(default = "default_host")]
    pub host: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Preferred model per task type ("implementation", "code-review", ...).
    #[serde(default)]
    pub task_models: HashMap<String, String>,
}

fn default_backend() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_generation_timeout() -> u64 {
    300
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            host: default_host(),
            timeout_secs: default_generation_timeout(),
            task_models: HashMap::new(),
        }
    }
}

/// Loop engine behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long `stop()` waits for the worker before giving up, in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Pause between two tasks, in milliseconds.
    #[serde(default = "default_task_delay")]
    pub task_delay_ms: u64,

    /// Ask the model for new tasks when the task list runs dry.
    #[serde(default = "default_true")]
    pub generate_tasks_when_empty: bool,

    /// Number of phase records returned by `get_status`.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Number of status log entries returned by `get_status`.
    #[serde(default = "default_status_window")]
    pub status_window: usize,
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_task_delay() -> u64 {
    1000
}

fn default_history_window() -> usize {
    10
}

fn default_status_window() -> usize {
    20
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
            task_delay_ms: default_task_delay(),
            generate_tasks_when_empty: true,
            history_window: default_history_window(),
            status_window: default_status_window(),
        }
    }
}

/// File tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Lifetime of a cached snapshot, in milliseconds.
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_ms: u64,

    /// Minimum interval between two real `diff()` scans, in milliseconds.
    #[serde(default = "default_diff_throttle")]
    pub diff_throttle_ms: u64,

    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    /// Extensions without the leading dot.
    #[serde(default = "default_ignore_extensions")]
    pub ignore_extensions: Vec<String>,
}

fn default_snapshot_ttl() -> u64 {
    500
}

fn default_diff_throttle() -> u64 {
    200
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_ms: default_snapshot_ttl(),
            diff_throttle_ms: default_diff_throttle(),
            ignore_dirs: default_ignore_dirs(),
            ignore_extensions: default_ignore_extensions(),
        }
    }
}

/// Pre-write validation and post-write execution of generated files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Run written interpretable files (Python, shell, JavaScript).
    #[serde(default = "default_true")]
    pub execute_files: bool,

    /// Run the project's test suite when a test file was written.
    #[serde(default = "default_true")]
    pub run_tests: bool,

    /// Timeout for a single execution, in seconds. Test runs get twice this.
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,

    /// Python interpreter used for syntax checks, execution and pytest.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_execution_timeout() -> u64 {
    30
}

fn default_python() -> String {
    "python3".to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            execute_files: true,
            run_tests: true,
            timeout_secs: default_execution_timeout(),
            python: default_python(),
        }
    }
}

/// Project configuration loaded from .ralph/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_true() -> bool {
    true
}

impl ProjectConfig {
    /// Load configuration from a project directory.
    ///
    /// A missing settings file is not an error: defaults are returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path)
            .map_err(|e| RalphError::config_with_path(e.to_string(), settings_path.clone()))?;
        let config: ProjectConfig = serde_json::from_str(&content)
            .map_err(|e| RalphError::config_with_path(e.to_string(), settings_path.clone()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to the project's settings file.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let settings_path = Self::settings_path(project_dir);
        if let Some(parent) = settings_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&settings_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".ralph/settings.json")
    }

    /// Get the task list path for a project
    pub fn fix_plan_path(project_dir: &Path) -> PathBuf {
        project_dir.join(crate::r#loop::task_list::FIX_PLAN_FILE)
    }

    /// Check every field that has a constrained range.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries > 10 {
            return Err(RalphError::invalid_config(
                "retry.max_retries",
                format!("{} exceeds the limit of 10", self.retry.max_retries),
            ));
        }
        if !self.retry.retry_delay_secs.is_finite() || self.retry.retry_delay_secs < 0.0 {
            return Err(RalphError::invalid_config(
                "retry.retry_delay_secs",
                "must be a non-negative number",
            ));
        }
        if self.generation.backend != "ollama" {
            return Err(RalphError::invalid_config(
                "generation.backend",
                format!("unknown backend '{}'. Valid options: ollama", self.generation.backend),
            ));
        }
        if self.generation.model.trim().is_empty() {
            return Err(RalphError::invalid_config("generation.model", "must not be empty"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(RalphError::invalid_config(
                "generation.timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.engine.history_window == 0 || self.engine.status_window == 0 {
            return Err(RalphError::invalid_config(
                "engine",
                "history_window and status_window must be greater than zero",
            ));
        }
        if self.validation.timeout_secs == 0 {
            return Err(RalphError::invalid_config(
                "validation.timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_ignore_dirs() {
        let dirs = default_ignore_dirs();
        assert!(dirs.contains(&".git".to_string()));
        assert!(dirs.contains(&"node_modules".to_string()));
        assert!(dirs.contains(&"__pycache__".to_string()));
    }

    #[test]
    fn test_project_config_default() {
        let config = ProjectConfig::default();
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.retry_delay_secs, 2.0);
        assert!(config.retry.continue_on_non_critical);
        assert_eq!(config.generation.backend, "ollama");
        assert_eq!(config.engine.history_window, 10);
        assert_eq!(config.engine.status_window, 20);
        assert_eq!(config.tracker.snapshot_ttl_ms, 500);
        assert_eq!(config.tracker.diff_throttle_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_project_config_load_missing() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_project_config_load_partial() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".ralph")).unwrap();
        std::fs::write(
            temp.path().join(".ralph/settings.json"),
            r#"{"retry": {"max_retries": 4}, "generation": {"model": "codellama"}}"#,
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.retry_delay_secs, 2.0);
        assert_eq!(config.generation.model, "codellama");
        assert_eq!(config.generation.host, "http://localhost:11434");
    }

    #[test]
    fn test_project_config_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".ralph")).unwrap();
        std::fs::write(temp.path().join(".ralph/settings.json"), "{not json").unwrap();

        let err = ProjectConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, RalphError::Config { path: Some(_), .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = ProjectConfig::default();
        config.generation.backend = "openai".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("generation.backend"));
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let mut config = ProjectConfig::default();
        config.retry.retry_delay_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut config = ProjectConfig::default();
        config.retry.continue_on_non_critical = false;
        config
            .generation
            .task_models
            .insert("implementation".to_string(), "deepseek-coder".to_string());
        config.save(temp.path()).unwrap();

        let loaded = ProjectConfig::load(temp.path()).unwrap();
        assert!(!loaded.retry.continue_on_non_critical);
        assert_eq!(
            loaded.generation.task_models.get("implementation"),
            Some(&"deepseek-coder".to_string())
        );
    }

    #[test]
    fn test_base_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay(), Duration::from_secs(2));
    }
}
