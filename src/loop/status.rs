//! Status events, phase records and the status callback.

use crate::changes::FileEntry;
use crate::quality::TestRunResult;
use crate::r#loop::progress::ProgressSnapshot;
use crate::r#loop::state::{LoopMode, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback invoked on the worker for every status event.
///
/// Errors and panics are caught by the engine and logged.
pub type StatusCallback = Arc<dyn Fn(&StatusEvent) -> anyhow::Result<()> + Send + Sync>;

/// One entry of the status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub phase: Phase,
    pub current_task: Option<String>,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
}

impl StatusEvent {
    /// Form mirrored into the log: `[phase] message (Progress: N%)`.
    #[must_use]
    pub fn log_line(&self) -> String {
        format!(
            "[{}] {} (Progress: {:.0}%)",
            self.phase,
            self.message,
            self.progress.phase_progress * 100.0
        )
    }
}

/// What a successful phase produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub text: String,
    /// Relative paths written during IMPLEMENT.
    pub files_written: Vec<String>,
    /// Generated files rejected by validation or confinement.
    pub files_skipped: Vec<String>,
    pub test_run: Option<TestRunResult>,
}

impl PhaseOutput {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Result of one phase after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Completed(PhaseOutput),
    /// Retries exhausted on a non-critical error, downgraded to success.
    CompletedWithWarning { output: PhaseOutput, warning: String },
    Failed { error: String, critical: bool },
}

impl PhaseOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    #[must_use]
    pub fn output(&self) -> Option<&PhaseOutput> {
        match self {
            Self::Completed(output) | Self::CompletedWithWarning { output, .. } => Some(output),
            Self::Failed { .. } => None,
        }
    }
}

/// Immutable history record for one phase run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionRecord {
    pub phase: Phase,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub retry_count: u32,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<String>,
}

impl PhaseExecutionRecord {
    pub(crate) fn from_outcome(
        phase: Phase,
        task: &str,
        started_at: DateTime<Utc>,
        outcome: &PhaseOutcome,
        retry_count: u32,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_secs = (completed_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let (success, output, error, warning, files_written) = match outcome {
            PhaseOutcome::Completed(out) => {
                (true, Some(out.text.clone()), None, None, out.files_written.clone())
            }
            PhaseOutcome::CompletedWithWarning { output, warning } => (
                true,
                Some(output.text.clone()),
                None,
                Some(warning.clone()),
                output.files_written.clone(),
            ),
            PhaseOutcome::Failed { error, .. } => (false, None, Some(error.clone()), None, Vec::new()),
        };

        Self {
            phase,
            task: task.to_string(),
            started_at,
            completed_at,
            success,
            output,
            error,
            warning,
            retry_count,
            duration_secs,
            files_written,
        }
    }
}

/// Snapshot returned by `LoopEngine::get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub mode: LoopMode,
    pub current_phase: Phase,
    pub current_task: Option<String>,
    pub phase_history: Vec<PhaseExecutionRecord>,
    pub status_log: Vec<StatusEvent>,
    pub progress: ProgressSnapshot,
    pub files: Vec<FileEntry>,
}
