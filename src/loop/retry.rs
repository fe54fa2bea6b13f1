//! Failure classification and retry decisions for phase execution.
//!
//! # Architecture
//!
//! ```text
//! phase error ──classify_and_decide──> RetryDecision
//!      │                                 │
//!      ▼                                 ├── critical:  stop the loop
//! FailureClass (log only)                ├── retry:     sleep `delay`, run again
//!                                        └── exhausted: warning or stop
//! ```

use crate::config::RetryConfig;
use crate::r#loop::state::Phase;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Substrings that make an error critical. Matched against lowercased text.
pub const CRITICAL_PATTERNS: [&str; 7] = [
    "permission denied",
    "disk full",
    "out of memory",
    "connection refused",
    "timeout",
    "authentication failed",
    "invalid api key",
];

// ============================================================================
// Failure Classification
// ============================================================================

/// Coarse category of a failure, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Network,
    Permission,
    Validation,
    Resource,
    Authentication,
    Unknown,
}

impl FailureClass {
    /// Classify an error message. First matching category wins.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let lower = error.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if has(&["connection", "network", "timeout", "refused"]) {
            Self::Network
        } else if has(&["permission", "access denied", "forbidden"]) {
            Self::Permission
        } else if has(&["validation", "invalid", "syntax"]) {
            Self::Validation
        } else if has(&["memory"]) {
            Self::Resource
        } else if has(&["authentication", "api key", "token"]) {
            Self::Authentication
        } else {
            Self::Unknown
        }
    }

    /// Get a human-readable description of this failure class.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::Authentication => "authentication",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// What to do about one failed phase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub is_critical: bool,
    pub should_retry: bool,
    /// Backoff before the next attempt; zero when not retrying.
    pub delay: Duration,
}

/// Retry policy with linear backoff.
///
/// # Example
///
/// ```
/// use ralph_ollama::r#loop::retry::RetryPolicy;
/// use ralph_ollama::r#loop::state::Phase;
///
/// let policy = RetryPolicy::default();
/// let decision = policy.classify_and_decide("model returned garbage", Phase::Study, 0);
/// assert!(decision.should_retry);
/// assert_eq!(decision.delay.as_secs(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    continue_on_non_critical: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from the `retry` settings section.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            continue_on_non_critical: config.continue_on_non_critical,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_continue_on_non_critical(mut self, enabled: bool) -> Self {
        self.continue_on_non_critical = enabled;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether exhausted non-critical failures become warnings.
    #[must_use]
    pub fn continue_on_non_critical(&self) -> bool {
        self.continue_on_non_critical
    }

    /// Whether an error is critical.
    ///
    /// Keyword matches are critical in every phase. Anything else is not,
    /// which includes every other UPDATE-phase error.
    #[must_use]
    pub fn is_critical(&self, error: &str, _phase: Phase) -> bool {
        let lower = error.to_lowercase();
        CRITICAL_PATTERNS.iter().any(|p| lower.contains(p))
    }

    /// Linear backoff: `base * (retry_count + 1)`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count.saturating_add(1))
    }

    /// Decide how to handle a failed attempt.
    ///
    /// `retry_count` is the number of retries already made for this phase.
    #[must_use]
    pub fn classify_and_decide(&self, error: &str, phase: Phase, retry_count: u32) -> RetryDecision {
        let is_critical = self.is_critical(error, phase);
        let should_retry = !is_critical && retry_count < self.max_retries;
        let delay = if should_retry {
            self.delay_for(retry_count)
        } else {
            Duration::ZERO
        };

        RetryDecision {
            is_critical,
            should_retry,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_boundaries() {
        let policy = RetryPolicy::default();

        let first = policy.classify_and_decide("some error", Phase::Implement, 0);
        assert!(!first.is_critical);
        assert!(first.should_retry);
        assert_eq!(first.delay, Duration::from_secs(2));

        let second = policy.classify_and_decide("some error", Phase::Implement, 1);
        assert!(second.should_retry);
        assert_eq!(second.delay, Duration::from_secs(4));

        let exhausted = policy.classify_and_decide("some error", Phase::Implement, 2);
        assert!(!exhausted.should_retry);
        assert_eq!(exhausted.delay, Duration::ZERO);
    }

    #[test]
    fn test_permission_denied_is_critical() {
        let policy = RetryPolicy::default();
        let decision = policy.classify_and_decide("Permission Denied: /etc", Phase::Study, 0);
        assert!(decision.is_critical);
        assert!(!decision.should_retry);
    }

    #[test]
    fn test_all_critical_patterns() {
        let policy = RetryPolicy::default();
        for pattern in CRITICAL_PATTERNS {
            let message = format!("request failed: {}", pattern.to_uppercase());
            assert!(policy.is_critical(&message, Phase::Test), "{pattern}");
        }
    }

    #[test]
    fn test_update_phase_non_keyword_is_not_critical() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_critical("could not write plan", Phase::Update));
        // A keyword still wins in UPDATE
        assert!(policy.is_critical("disk full", Phase::Update));
    }

    #[test]
    fn test_custom_policy() {
        let policy = RetryPolicy::default()
            .with_max_retries(0)
            .with_base_delay(Duration::from_millis(10))
            .with_continue_on_non_critical(false);
        assert!(!policy.classify_and_decide("flaky", Phase::Study, 0).should_retry);
        assert!(!policy.continue_on_non_critical());
        assert_eq!(policy.delay_for(2), Duration::from_millis(30));
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_retries: 5,
            retry_delay_secs: 0.5,
            continue_on_non_critical: false,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(FailureClass::classify("Connection refused"), FailureClass::Network);
        assert_eq!(FailureClass::classify("request timeout"), FailureClass::Network);
        assert_eq!(FailureClass::classify("403 Forbidden"), FailureClass::Permission);
        assert_eq!(FailureClass::classify("invalid syntax"), FailureClass::Validation);
        assert_eq!(FailureClass::classify("Out of memory"), FailureClass::Resource);
        assert_eq!(
            FailureClass::classify("authentication failed"),
            FailureClass::Authentication
        );
        assert_eq!(FailureClass::classify("something odd"), FailureClass::Unknown);
        assert_eq!(FailureClass::Network.to_string(), "network");
    }
}
