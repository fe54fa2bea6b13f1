//! Phase and task progress estimation.
//!
//! Estimates are recomputed on demand from the phase start time, a trailing
//! window of past phase durations, and (while implementing) how many of the
//! extracted files have been written so far.

use crate::r#loop::state::Phase;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Durations kept per phase for the running average.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Progress cap for time-based estimates; a phase is never "done" by the clock alone.
const TIME_CAP: f64 = 0.9;
const FILE_CAP: f64 = 0.95;
const UPDATE_PROGRESS: f64 = 0.8;

/// Average duration assumed for a phase with no history, in seconds.
#[must_use]
pub fn default_duration(phase: Phase) -> f64 {
    match phase {
        Phase::Study => 30.0,
        Phase::Implement => 60.0,
        Phase::Test => 20.0,
        Phase::Update => 5.0,
        _ => 30.0,
    }
}

/// Progress reported before a phase has started.
fn idle_progress(phase: Phase) -> f64 {
    match phase {
        Phase::Study => 0.3,
        Phase::Implement => 0.4,
        Phase::Test => 0.5,
        Phase::Update => UPDATE_PROGRESS,
        _ => 0.0,
    }
}

/// Point-in-time view of the estimator, embedded in status events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase_progress: f64,
    pub task_progress: f64,
    /// `None` when the current phase has not started.
    pub time_remaining_secs: Option<f64>,
    pub files_expected: usize,
    pub files_written: usize,
}

/// Tracks phase timing for one engine.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    window: usize,
    durations: HashMap<Phase, VecDeque<f64>>,
    phase_started: Option<Instant>,
    completed_this_task: HashSet<Phase>,
    files_expected: usize,
    files_written: usize,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl ProgressEstimator {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            durations: HashMap::new(),
            phase_started: None,
            completed_this_task: HashSet::new(),
            files_expected: 0,
            files_written: 0,
        }
    }

    /// A new task begins; per-task counters reset, duration history stays.
    pub fn start_task(&mut self) {
        self.completed_this_task.clear();
        self.phase_started = None;
        self.files_expected = 0;
        self.files_written = 0;
    }

    pub fn start_phase(&mut self, _phase: Phase) {
        self.phase_started = Some(Instant::now());
        self.files_expected = 0;
        self.files_written = 0;
    }

    /// Number of files the implement phase is about to write.
    pub fn set_files_expected(&mut self, count: usize) {
        self.files_expected = count;
        self.files_written = 0;
    }

    pub fn record_file_written(&mut self) {
        self.files_written += 1;
    }

    /// Close the running phase and feed its duration into the history.
    pub fn finish_phase(&mut self, phase: Phase, duration: Duration, success: bool) {
        self.record_duration(phase, duration.as_secs_f64());
        if success {
            self.completed_this_task.insert(phase);
        }
        self.phase_started = None;
    }

    /// Push a duration, keeping only the trailing window.
    pub fn record_duration(&mut self, phase: Phase, secs: f64) {
        let entries = self.durations.entry(phase).or_default();
        entries.push_back(secs);
        while entries.len() > self.window {
            entries.pop_front();
        }
    }

    /// Mean of the recorded durations, or the phase default.
    #[must_use]
    pub fn average_duration(&self, phase: Phase) -> f64 {
        match self.durations.get(&phase) {
            Some(entries) if !entries.is_empty() => {
                entries.iter().sum::<f64>() / entries.len() as f64
            }
            _ => default_duration(phase),
        }
    }

    fn elapsed(&self) -> Option<f64> {
        self.phase_started.map(|start| start.elapsed().as_secs_f64())
    }

    /// Progress of `phase` in `[0, 1]`.
    #[must_use]
    pub fn phase_progress(&self, phase: Phase) -> f64 {
        self.phase_progress_with(phase, self.elapsed())
    }

    /// Progress of `phase` given an explicit elapsed time.
    #[must_use]
    pub fn phase_progress_with(&self, phase: Phase, elapsed: Option<f64>) -> f64 {
        let time_ratio = |elapsed: f64| {
            let avg = self.average_duration(phase);
            (avg > 0.0).then(|| (elapsed / avg).min(TIME_CAP))
        };

        match phase {
            Phase::Update => UPDATE_PROGRESS,
            Phase::Implement if self.files_expected > 0 => {
                (self.files_written as f64 / self.files_expected as f64).min(FILE_CAP)
            }
            Phase::Study | Phase::Implement | Phase::Test => elapsed
                .and_then(time_ratio)
                .unwrap_or_else(|| idle_progress(phase)),
            _ => 0.0,
        }
    }

    /// Progress of the whole task while `current` runs.
    #[must_use]
    pub fn task_progress(&self, current: Phase) -> f64 {
        self.task_progress_with(current, self.elapsed())
    }

    #[must_use]
    pub fn task_progress_with(&self, current: Phase, elapsed: Option<f64>) -> f64 {
        let total = Phase::CYCLE.len() as f64;
        let completed = Phase::CYCLE
            .iter()
            .filter(|p| self.completed_this_task.contains(p))
            .count() as f64;

        if current.is_working() && !self.completed_this_task.contains(&current) {
            (completed + self.phase_progress_with(current, elapsed)) / total
        } else {
            completed / total
        }
    }

    /// Seconds left in the running phase by the historical average.
    #[must_use]
    pub fn time_remaining(&self, phase: Phase) -> Option<f64> {
        self.time_remaining_with(phase, self.elapsed())
    }

    #[must_use]
    pub fn time_remaining_with(&self, phase: Phase, elapsed: Option<f64>) -> Option<f64> {
        let elapsed = elapsed?;
        let avg = self.average_duration(phase);
        (avg > 0.0).then(|| (avg - elapsed).max(0.0))
    }

    #[must_use]
    pub fn snapshot(&self, current: Phase) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        ProgressSnapshot {
            phase_progress: self.phase_progress_with(current, elapsed),
            task_progress: self.task_progress_with(current, elapsed),
            time_remaining_secs: if current.is_working() {
                self.time_remaining_with(current, elapsed)
            } else {
                None
            },
            files_expected: self.files_expected,
            files_written: self.files_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_idle_progress_before_start() {
        let est = ProgressEstimator::default();
        assert!(approx(est.phase_progress(Phase::Study), 0.3));
        assert!(approx(est.phase_progress(Phase::Implement), 0.4));
        assert!(approx(est.phase_progress(Phase::Test), 0.5));
        assert!(approx(est.phase_progress(Phase::Update), 0.8));
        assert!(approx(est.phase_progress(Phase::Idle), 0.0));
    }

    #[test]
    fn test_time_ratio_capped() {
        let est = ProgressEstimator::default();
        assert!(approx(est.phase_progress_with(Phase::Study, Some(15.0)), 0.5));
        assert!(approx(est.phase_progress_with(Phase::Study, Some(300.0)), 0.9));
        assert!(approx(est.phase_progress_with(Phase::Test, Some(5.0)), 0.25));
    }

    #[test]
    fn test_implement_file_ratio() {
        let mut est = ProgressEstimator::default();
        est.start_phase(Phase::Implement);
        est.set_files_expected(4);
        est.record_file_written();
        assert!(approx(est.phase_progress(Phase::Implement), 0.25));
        for _ in 0..3 {
            est.record_file_written();
        }
        assert!(approx(est.phase_progress(Phase::Implement), 0.95));
    }

    #[test]
    fn test_average_window() {
        let mut est = ProgressEstimator::new(3);
        assert!(approx(est.average_duration(Phase::Implement), 60.0));
        for secs in [100.0, 1.0, 2.0, 3.0] {
            est.record_duration(Phase::Implement, secs);
        }
        assert!(approx(est.average_duration(Phase::Implement), 2.0));
    }

    #[test]
    fn test_task_progress() {
        let mut est = ProgressEstimator::default();
        est.start_task();
        assert!(approx(est.task_progress_with(Phase::Study, Some(15.0)), 0.5 / 4.0));

        est.finish_phase(Phase::Study, Duration::from_secs(10), true);
        est.finish_phase(Phase::Implement, Duration::from_secs(10), true);
        // Test not started yet: 0.5 before start
        assert!(approx(est.task_progress_with(Phase::Test, None), 2.5 / 4.0));

        est.finish_phase(Phase::Test, Duration::from_secs(1), false);
        assert!(approx(est.task_progress_with(Phase::Idle, None), 0.5));

        est.start_task();
        assert!(approx(est.task_progress_with(Phase::Idle, None), 0.0));
    }

    #[test]
    fn test_time_remaining() {
        let est = ProgressEstimator::default();
        assert_eq!(est.time_remaining(Phase::Study), None);
        assert_eq!(est.time_remaining_with(Phase::Study, Some(10.0)), Some(20.0));
        assert_eq!(est.time_remaining_with(Phase::Update, Some(10.0)), Some(0.0));
    }

    #[test]
    fn test_snapshot_idle() {
        let est = ProgressEstimator::default();
        let snap = est.snapshot(Phase::Idle);
        assert!(approx(snap.phase_progress, 0.0));
        assert!(snap.time_remaining_secs.is_none());
    }
}
