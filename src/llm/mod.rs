//! Generation client abstraction for the loop engine.
//!
//! The engine never talks to a model server directly. It goes through the
//! [`GenerationClient`] trait, which keeps phases testable with a scripted
//! client and leaves transport concerns (timeouts, server discovery) to the
//! concrete implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use ralph_ollama::llm::{GenerationClient, GenerationRequest, OllamaClient};
//!
//! let client = OllamaClient::new("llama3.2");
//! if client.check_available().await {
//!     let response = client
//!         .generate(GenerationRequest::new("Explain this module").with_task_type("code-review"))
//!         .await?;
//!     println!("{}", response.content);
//! }
//! ```

pub mod ollama;

pub use ollama::{select_model_for_task, OllamaClient};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Abstraction over a text-generation backend.
///
/// Object-safe, so the engine holds it as `Arc<dyn GenerationClient>`.
/// Implementations must be `Send + Sync` because phases run on a spawned
/// tokio task.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Check whether the backend can serve requests right now.
    ///
    /// Never fails: an unreachable backend simply reports `false`.
    async fn check_available(&self) -> bool;

    /// Produce a completion for the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable, the model is missing,
    /// or the request times out. The error text is what the retry policy
    /// classifies, so implementations should keep server messages intact.
    async fn generate(&self, request: GenerationRequest) -> Result<Generation>;
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// A single generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user prompt.
    pub prompt: String,
    /// Optional system prompt framing the role of the model.
    pub system_prompt: Option<String>,
    /// Explicit model override. `None` lets the client choose by task type.
    pub model: Option<String>,
    /// Task category used for model selection ("code-review", "implementation", "testing").
    pub task_type: Option<String>,
}

impl GenerationRequest {
    /// Create a request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Pin a specific model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the task type.
    #[must_use]
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }
}

/// Token accounting reported by the backend (or estimated).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
}

impl TokenUsage {
    /// Total tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt + self.completion
    }

    /// Rough estimate at ~4 characters per token.
    #[must_use]
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self {
            prompt: (prompt.len() / 4) as u32,
            completion: (completion.len() / 4) as u32,
        }
    }
}

/// A completed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    pub tokens: TokenUsage,
}
