//! Loop engine module.
//!
//! This module contains the study/implement/test/update loop and the pieces
//! it is built from:
//!
//! - [`engine`] - `LoopEngine` handle, background worker and `EngineRegistry`
//! - [`state`] - Modes, phases and the transition table
//! - [`phases`] - Prompts and the per-phase `execute` dispatch
//! - [`task_list`] - Reading and updating `@fix_plan.md`
//! - [`extract`] - Code block extraction from model responses
//! - [`workspace`] - Confinement and writing of generated files
//! - [`retry`] - Failure classification and retry decisions
//! - [`progress`] - Phase and task progress estimation
//! - [`status`] - Status events, phase records and loop status
//! - [`project`] - Project scaffolding
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ LoopEngine  │────>│ phases       │────>│ extract     │
//! │  (worker)   │     │  ::execute   │     │ workspace   │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!       │                    │                    │
//!       v                    v                    v
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ RetryPolicy │     │ TaskList     │     │ FileTracker │
//! │ Progress    │     │ @fix_plan.md │     │ (changes)   │
//! └─────────────┘     └──────────────┘     └─────────────┘
//! ```

pub mod engine;
pub mod extract;
pub mod phases;
pub mod progress;
pub mod project;
pub mod retry;
pub mod state;
pub mod status;
pub mod task_list;
pub mod workspace;

// Re-exports for convenience
pub use engine::{EngineRegistry, LoopEngine};
pub use extract::{extract_files, GeneratedFile};
pub use progress::{ProgressEstimator, ProgressSnapshot};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use state::{ControlState, LoopMode, Phase, Transition};
pub use status::{LoopStatus, PhaseExecutionRecord, PhaseOutcome, PhaseOutput, StatusEvent};
pub use task_list::{TaskList, FIX_PLAN_FILE};
pub use workspace::Workspace;
