//! Loop state types and transitions.
//!
//! This module defines the execution mode, the closed set of phases with
//! their transition table, and the control state shared between the engine
//! handle and its worker.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Loop execution mode.
///
/// # Example
///
/// ```
/// use ralph_ollama::r#loop::state::LoopMode;
///
/// let mode = LoopMode::PhaseByPhase;
/// assert_eq!(mode.to_string(), "phase_by_phase");
/// ```
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Run phases back to back until the task list is exhausted
    #[default]
    #[value(alias = "non_stop")]
    NonStop,
    /// Pause after every phase until resumed
    #[value(alias = "phase_by_phase")]
    PhaseByPhase,
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopMode::NonStop => write!(f, "non_stop"),
            LoopMode::PhaseByPhase => write!(f, "phase_by_phase"),
        }
    }
}

/// A phase of the study/implement/test/update cycle, plus the three
/// terminal-ish states the loop can rest in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Study,
    Implement,
    Test,
    Update,
    #[default]
    Idle,
    Complete,
    Error,
}

/// Event that drives a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// An incomplete task was selected
    TaskSelected,
    /// The task list is exhausted (after optional generation)
    NoTasks,
    /// The current phase finished (successfully or with a warning)
    PhaseDone,
    /// Something failed that the loop cannot recover from
    Unrecoverable,
}

impl Phase {
    /// The four working phases in execution order.
    pub const CYCLE: [Phase; 4] = [Phase::Study, Phase::Implement, Phase::Test, Phase::Update];

    /// Transition table. Returns `None` for transitions that cannot happen.
    ///
    /// ```text
    /// idle --TaskSelected--> study --PhaseDone--> implement --PhaseDone--> test
    ///   ^                                                                   |
    ///   +----------------------PhaseDone------- update <------PhaseDone----+
    /// idle --NoTasks--> complete
    /// any  --Unrecoverable--> error
    /// ```
    #[must_use]
    pub fn next(self, transition: Transition) -> Option<Phase> {
        use Phase::*;
        use Transition::*;

        match (self, transition) {
            (_, Unrecoverable) => Some(Error),
            (Idle, TaskSelected) => Some(Study),
            (Idle, NoTasks) => Some(Complete),
            (Study, PhaseDone) => Some(Implement),
            (Implement, PhaseDone) => Some(Test),
            (Test, PhaseDone) => Some(Update),
            (Update, PhaseDone) => Some(Idle),
            _ => None,
        }
    }

    /// Whether this phase does work for a task.
    #[must_use]
    pub fn is_working(self) -> bool {
        Self::CYCLE.contains(&self)
    }

    /// Upper-case label used in status messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Phase::Study => "STUDY",
            Phase::Implement => "IMPLEMENT",
            Phase::Test => "TEST",
            Phase::Update => "UPDATE",
            Phase::Idle => "IDLE",
            Phase::Complete => "COMPLETE",
            Phase::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Study => "study",
            Phase::Implement => "implement",
            Phase::Test => "test",
            Phase::Update => "update",
            Phase::Idle => "idle",
            Phase::Complete => "complete",
            Phase::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Control state of a running loop.
///
/// Lives inside a single `watch` channel owned by the engine; every field is
/// read and written under that one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub mode: LoopMode,
    pub current_phase: Phase,
    pub current_task: Option<String>,
    pub is_running: bool,
    pub is_paused: bool,
    pub should_stop: bool,
}

impl ControlState {
    /// Fresh state for a run in the given mode.
    #[must_use]
    pub fn starting(mode: LoopMode) -> Self {
        Self {
            mode,
            current_phase: Phase::Idle,
            current_task: None,
            is_running: true,
            is_paused: false,
            should_stop: false,
        }
    }

    /// Whether the worker may proceed past a phase boundary.
    #[must_use]
    pub fn may_proceed(&self) -> bool {
        !self.is_paused || self.should_stop
    }
}
