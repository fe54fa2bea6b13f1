//! Ollama generation client.
//!
//! Drives a local Ollama server through the `ollama` CLI. The host is handed
//! to the CLI through `OLLAMA_HOST`, so the same client works against a
//! remote server.

use crate::config::GenerationConfig;
use crate::llm::{Generation, GenerationClient, GenerationRequest, TokenUsage};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Timeout for `ollama list` during availability checks.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Ollama API Errors
// =============================================================================

/// Errors that can occur when driving the Ollama CLI.
#[derive(Debug, Error)]
pub enum OllamaApiError {
    /// The `ollama` binary is not on PATH.
    #[error("ollama CLI not found on PATH")]
    CliMissing,

    /// Server refused or dropped the connection.
    #[error("Ollama server not available at '{host}': {message}")]
    ServerUnavailable { host: String, message: String },

    #[error("Model '{model}' is not installed. Run: ollama pull {model}")]
    ModelNotFound { model: String },

    /// The wording keeps "timeout" so the retry policy treats it as critical.
    #[error("Generation timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid response from Ollama: {message}")]
    InvalidResponse { message: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },
}

// =============================================================================
// Model Selection
// =============================================================================

/// Pick the model for a task type.
///
/// Order: explicit per-task configuration, built-in fallbacks for the known
/// task types, then the default model.
#[must_use]
pub fn select_model_for_task(
    task_type: Option<&str>,
    task_models: &HashMap<String, String>,
    default_model: &str,
) -> String {
    let Some(task_type) = task_type else {
        return default_model.to_string();
    };

    if let Some(model) = task_models.get(task_type) {
        return model.clone();
    }

    match task_type {
        "implementation" | "code-review" | "refactoring" => "codellama".to_string(),
        "testing" | "documentation" => "llama3.2".to_string(),
        _ => default_model.to_string(),
    }
}

/// Does a line of `ollama list` output name this model?
///
/// Output looks like:
/// ```text
/// NAME            ID              SIZE    MODIFIED
/// llama3:latest   abc123...       4.7GB   2 days ago
/// ```
fn list_contains_model(list_output: &str, model: &str) -> bool {
    let wanted = model.split(':').next().unwrap_or(model);
    list_output.lines().skip(1).any(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|name| name == model || name.split(':').next() == Some(wanted))
    })
}

/// Join system and user prompt the way the CLI expects a single input.
fn compose_prompt(request: &GenerationRequest) -> String {
    match request.system_prompt.as_deref() {
        Some(system) if !system.trim().is_empty() => {
            format!("{}\n\n{}", system.trim_end(), request.prompt)
        }
        _ => request.prompt.clone(),
    }
}

// =============================================================================
// Ollama Client
// =============================================================================

/// Generation client backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    default_model: String,
    host: String,
    timeout_secs: u64,
    task_models: HashMap<String, String>,
    /// When false, `generate` uses the default model for every task type.
    task_routing: bool,
}

impl OllamaClient {
    /// Default Ollama server host.
    pub const DEFAULT_HOST: &'static str = "http://localhost:11434";

    /// Default request timeout (local inference can be slow).
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Create a client for the given default model.
    #[must_use]
    pub fn new(default_model: &str) -> Self {
        Self {
            default_model: default_model.to_string(),
            host: Self::DEFAULT_HOST.to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            task_models: HashMap::new(),
            task_routing: true,
        }
    }

    /// Create a client from the `generation` section of the project settings.
    #[must_use]
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(&config.model)
            .with_host(&config.host)
            .with_timeout(config.timeout_secs)
            .with_task_models(config.task_models.clone())
    }

    /// Set the server host.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set per-task-type model preferences.
    #[must_use]
    pub fn with_task_models(mut self, task_models: HashMap<String, String>) -> Self {
        self.task_models = task_models;
        self
    }

    /// Use the default model for every request, ignoring task types.
    ///
    /// The CLI sets this when the user pins a model with `--model`.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.task_routing = false;
        self
    }

    /// Get the configured host URL.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the default model.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Resolve the model a request will run on.
    #[must_use]
    pub fn model_for(&self, request: &GenerationRequest) -> String {
        if let Some(model) = &request.model {
            return model.clone();
        }
        if !self.task_routing {
            return self.default_model.clone();
        }
        select_model_for_task(
            request.task_type.as_deref(),
            &self.task_models,
            &self.default_model,
        )
    }

    /// List installed models via `ollama list`.
    pub async fn list_models(&self) -> Result<String, OllamaApiError> {
        if which::which("ollama").is_err() {
            return Err(OllamaApiError::CliMissing);
        }

        let output = match tokio::time::timeout(
            LIST_TIMEOUT,
            AsyncCommand::new("ollama")
                .arg("list")
                .env("OLLAMA_HOST", &self.host)
                .output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(OllamaApiError::ConnectionError {
                    message: format!("Failed to run 'ollama list': {}", e),
                })
            }
            Err(_) => {
                return Err(OllamaApiError::Timeout {
                    timeout_secs: LIST_TIMEOUT.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(OllamaApiError::ServerUnavailable {
                host: self.host.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a prompt via `ollama run`.
    async fn execute_prompt(&self, model: &str, prompt: &str) -> Result<String, OllamaApiError> {
        debug!("Running Ollama {} ({} chars prompt)", model, prompt.len());

        let mut child = AsyncCommand::new("ollama")
            .args(["run", model])
            .env("OLLAMA_HOST", &self.host)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OllamaApiError::ConnectionError {
                message: format!("Failed to spawn ollama process: {}", e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| OllamaApiError::ConnectionError {
                    message: format!("Failed to write prompt: {}", e),
                })?;
            stdin
                .flush()
                .await
                .map_err(|e| OllamaApiError::ConnectionError {
                    message: format!("Failed to flush stdin: {}", e),
                })?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(OllamaApiError::ConnectionError {
                    message: format!("Failed to read output: {}", e),
                });
            }
            Err(_) => {
                return Err(OllamaApiError::Timeout {
                    timeout_secs: self.timeout_secs,
                });
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let lowered = stderr.to_lowercase();
        if lowered.contains("model") && lowered.contains("not found") {
            Err(OllamaApiError::ModelNotFound {
                model: model.to_string(),
            })
        } else if lowered.contains("connection refused") || lowered.contains("connect:") {
            Err(OllamaApiError::ServerUnavailable {
                host: self.host.clone(),
                message: stderr.trim().to_string(),
            })
        } else {
            Err(OllamaApiError::InvalidResponse {
                message: stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl GenerationClient for OllamaClient {
    async fn check_available(&self) -> bool {
        match self.list_models().await {
            Ok(listing) => {
                let available = list_contains_model(&listing, &self.default_model);
                if !available {
                    debug!("Model {} not in 'ollama list' output", self.default_model);
                }
                available
            }
            Err(e) => {
                debug!("Ollama unavailable: {}", e);
                false
            }
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        let model = self.model_for(&request);
        let prompt = compose_prompt(&request);

        let content = self.execute_prompt(&model, &prompt).await?;
        let tokens = TokenUsage::estimate(&prompt, &content);

        Ok(Generation {
            content,
            model,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_model_fallbacks() {
        let none = HashMap::new();
        assert_eq!(
            select_model_for_task(Some("implementation"), &none, "llama3.2"),
            "codellama"
        );
        assert_eq!(
            select_model_for_task(Some("code-review"), &none, "llama3.2"),
            "codellama"
        );
        assert_eq!(
            select_model_for_task(Some("testing"), &none, "mistral"),
            "llama3.2"
        );
        assert_eq!(select_model_for_task(Some("chat"), &none, "mistral"), "mistral");
        assert_eq!(select_model_for_task(None, &none, "mistral"), "mistral");
    }

    #[test]
    fn test_select_model_configured_wins() {
        let mut models = HashMap::new();
        models.insert("implementation".to_string(), "deepseek-coder".to_string());
        assert_eq!(
            select_model_for_task(Some("implementation"), &models, "llama3.2"),
            "deepseek-coder"
        );
    }

    #[test]
    fn test_model_for_respects_pin_and_override() {
        let client = OllamaClient::new("mistral").pinned();
        let request = GenerationRequest::new("x").with_task_type("implementation");
        assert_eq!(client.model_for(&request), "mistral");

        let request = request.with_model("phi3");
        assert_eq!(client.model_for(&request), "phi3");
    }

    #[test]
    fn test_list_contains_model() {
        let listing = "NAME              ID        SIZE   MODIFIED\n\
                       llama3.2:latest   abc123    2.0GB  2 days ago\n\
                       codellama:7b      def456    3.8GB  1 week ago\n";
        assert!(list_contains_model(listing, "llama3.2"));
        assert!(list_contains_model(listing, "codellama"));
        assert!(list_contains_model(listing, "llama3.2:latest"));
        assert!(!list_contains_model(listing, "llama3"));
        assert!(!list_contains_model(listing, "mistral"));
    }

    #[test]
    fn test_compose_prompt() {
        let request = GenerationRequest::new("Do the thing").with_system_prompt("You are X.\n");
        assert_eq!(compose_prompt(&request), "You are X.\n\nDo the thing");
        assert_eq!(compose_prompt(&GenerationRequest::new("bare")), "bare");
    }

    #[test]
    fn test_from_config() {
        let mut config = GenerationConfig::default();
        config.host = "http://10.0.0.2:11434".to_string();
        config.timeout_secs = 42;
        let client = OllamaClient::from_config(&config);
        assert_eq!(client.host(), "http://10.0.0.2:11434");
        assert_eq!(client.default_model(), "llama3.2");
        assert_eq!(client.timeout_secs, 42);
    }

    #[test]
    fn test_timeout_error_mentions_timeout() {
        let err = OllamaApiError::Timeout { timeout_secs: 5 };
        assert!(err.to_string().to_lowercase().contains("timeout"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_available() {
        let client = OllamaClient::new("llama3.2").with_host("http://127.0.0.1:1");
        assert!(!client.check_available().await);
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OllamaClient>();
    }
}
