//! Scripted generation client.
//!
//! Replies are looked up by task type, so one client can drive a whole
//! study/implement/test cycle deterministically.

use crate::llm::{Generation, GenerationClient, GenerationRequest, TokenUsage};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Mock implementation of [`GenerationClient`].
///
/// # Example
///
/// ```rust,ignore
/// let client = ScriptedGenerator::new()
///     .with_response("implementation", "```hello.py\nprint('hi')\n```")
///     .fail_times(1, "model busy");
///
/// assert!(client.generate(GenerationRequest::new("x")).await.is_err());
/// ```
#[derive(Debug)]
pub struct ScriptedGenerator {
    responses: HashMap<String, String>,
    default_response: String,
    available: AtomicBool,
    failures_left: AtomicU32,
    failure_message: String,
    delay: Duration,
    call_count: AtomicU32,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: "OK".to_string(),
            available: AtomicBool::new(true),
            failures_left: AtomicU32::new(0),
            failure_message: String::new(),
            delay: Duration::ZERO,
            call_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for requests with this task type.
    #[must_use]
    pub fn with_response(mut self, task_type: &str, content: &str) -> Self {
        self.responses
            .insert(task_type.to_string(), content.to_string());
        self
    }

    /// Reply for requests with no scripted task type.
    #[must_use]
    pub fn with_default_response(mut self, content: &str) -> Self {
        self.default_response = content.to_string();
        self
    }

    /// Fail the next `count` calls with `message`.
    #[must_use]
    pub fn fail_times(self, count: u32, message: &str) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        Self {
            failure_message: message.to_string(),
            ..self
        }
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `generate` calls, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn check_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("{}", self.failure_message)
        }

        let content = request
            .task_type
            .as_deref()
            .and_then(|t| self.responses.get(t))
            .unwrap_or(&self.default_response)
            .clone();

        Ok(Generation {
            tokens: TokenUsage::estimate(&request.prompt, &content),
            model: request.model.unwrap_or_else(|| "scripted".to_string()),
            content,
        })
    }
}
