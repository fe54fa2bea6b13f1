//! The loop engine: one background worker per project driving the
//! study/implement/test/update cycle over the task list.
//!
//! # Architecture
//!
//! ```text
//! LoopEngine (handle)                      worker (tokio task)
//!   start/pause/resume/stop ──send_modify──> watch<ControlState> ──wait_for──┐
//!   get_status <── Mutex<history/log/tracker/progress> <── records, events ──┘
//! ```
//!
//! Control fields live in a single `watch` channel, so the worker blocks on
//! pause and retry backoff without polling. History, status log, tracker and
//! progress each sit behind their own short-held mutex.

use crate::changes::FileTracker;
use crate::config::ProjectConfig;
use crate::error::{RalphError, Result};
use crate::llm::{GenerationClient, OllamaClient};
use crate::quality::CodeValidator;
use crate::r#loop::phases::{self, task_generation_request, PhaseContext};
use crate::r#loop::progress::ProgressEstimator;
use crate::r#loop::project::{self, ProjectInfo};
use crate::r#loop::retry::{FailureClass, RetryPolicy};
use crate::r#loop::state::{ControlState, LoopMode, Phase, Transition};
use crate::r#loop::status::{
    LoopStatus, PhaseExecutionRecord, PhaseOutcome, PhaseOutput, StatusCallback, StatusEvent,
};
use crate::r#loop::task_list::{description_from_readme, parse_generated_tasks, TaskList};
use crate::r#loop::workspace::Workspace;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on retained status events.
const STATUS_LOG_CAPACITY: usize = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the handle and the worker.
struct Shared {
    root: PathBuf,
    config: ProjectConfig,
    client: Arc<dyn GenerationClient>,
    policy: RetryPolicy,
    task_list: TaskList,
    workspace: Workspace,
    validator: CodeValidator,
    control: watch::Sender<ControlState>,
    project: Mutex<ProjectInfo>,
    user_input: Mutex<Option<String>>,
    history: Mutex<Vec<PhaseExecutionRecord>>,
    status_log: Mutex<VecDeque<StatusEvent>>,
    tracker: Mutex<FileTracker>,
    progress: Mutex<ProgressEstimator>,
    callback: Mutex<Option<StatusCallback>>,
}

impl Shared {
    fn control(&self) -> ControlState {
        self.control.borrow().clone()
    }

    fn stop_requested(&self) -> bool {
        self.control.borrow().should_stop
    }

    fn set_phase(&self, phase: Phase) {
        self.control.send_modify(|c| c.current_phase = phase);
    }

    /// Record a status event, mirror it to tracing and the callback.
    fn emit(&self, message: impl Into<String>, phase: Phase) {
        let current_task = self.control.borrow().current_task.clone();
        let progress = lock(&self.progress).snapshot(phase);
        let event = StatusEvent {
            timestamp: Utc::now(),
            message: message.into(),
            phase,
            current_task,
            progress,
        };

        info!("{}", event.log_line());

        {
            let mut log = lock(&self.status_log);
            log.push_back(event.clone());
            while log.len() > STATUS_LOG_CAPACITY {
                log.pop_front();
            }
        }

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Status callback failed: {:#}", e),
                Err(_) => warn!("Status callback panicked"),
            }
        }
    }

    /// Block at a phase boundary until not paused. `false` when stopping.
    async fn wait_at_boundary(&self) -> bool {
        let mut rx = self.control.subscribe();
        let proceed = match rx.wait_for(ControlState::may_proceed).await {
            Ok(state) => !state.should_stop,
            Err(_) => false,
        };
        proceed
    }

    /// Sleep for `delay` unless a stop arrives first. `true` if the full delay elapsed.
    async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let mut rx = self.control.subscribe();
        let elapsed = tokio::time::timeout(delay, rx.wait_for(|c| c.should_stop))
            .await
            .is_err();
        elapsed
    }

    // ------------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------------

    async fn run(&self) {
        self.emit("Starting Ralph loop", Phase::Idle);
        lock(&self.tracker).start_tracking();

        let mut generation_attempted = false;

        while !self.stop_requested() {
            let task = match self.next_task(&mut generation_attempted).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    self.finish(Phase::Idle.next(Transition::NoTasks), "No more tasks, loop complete");
                    return;
                }
                Err(e) => {
                    error!("Could not read task list: {}", e);
                    self.finish(
                        Phase::Idle.next(Transition::Unrecoverable),
                        format!("Loop error: {}", e),
                    );
                    return;
                }
            };

            match self.run_task(&task).await {
                TaskEnd::Done => {}
                TaskEnd::Stopped => break,
                TaskEnd::Failed { phase, error } => {
                    self.finish(
                        phase.next(Transition::Unrecoverable),
                        format!("Phase {} failed: {}", phase, error),
                    );
                    return;
                }
            }

            self.control.send_modify(|c| {
                c.current_task = None;
                c.current_phase = Phase::Idle;
            });

            let delay = Duration::from_millis(self.config.engine.task_delay_ms);
            if !delay.is_zero() && !self.sleep_unless_stopped(delay).await {
                break;
            }
        }

        self.emit("Loop stopped", self.control().current_phase);
    }

    fn finish(&self, phase: Option<Phase>, message: impl Into<String>) {
        let phase = phase.unwrap_or(Phase::Error);
        self.control.send_modify(|c| {
            c.current_phase = phase;
            c.is_running = false;
            c.is_paused = false;
        });
        self.emit(message, phase);
    }

    async fn next_task(&self, generation_attempted: &mut bool) -> Result<Option<String>> {
        if let Some(task) = self.task_list.next_task()? {
            return Ok(Some(task));
        }
        if *generation_attempted || !self.config.engine.generate_tasks_when_empty {
            return Ok(None);
        }

        *generation_attempted = true;
        let tasks = self.generate_tasks().await;
        if tasks.is_empty() || !self.task_list.append_tasks(&tasks)? {
            return Ok(None);
        }
        self.task_list.next_task()
    }

    /// Ask the model for starter tasks. Fails soft with an empty list.
    async fn generate_tasks(&self) -> Vec<String> {
        let info = lock(&self.project).clone();
        let description = info
            .description
            .clone()
            .or_else(|| description_from_readme(&self.root));
        let Some(description) = description else {
            debug!("No project description, skipping task generation");
            return Vec::new();
        };

        self.emit("Generating tasks from project description", Phase::Idle);
        if !self.client.check_available().await {
            self.emit(
                "Generation backend not available, cannot generate tasks automatically",
                Phase::Idle,
            );
            return Vec::new();
        }

        let name = Some(info.name.as_str()).filter(|n| !n.is_empty());
        match self
            .client
            .generate(task_generation_request(name, &description))
            .await
        {
            Ok(generation) => {
                let tasks = parse_generated_tasks(&generation.content);
                if tasks.is_empty() {
                    self.emit("Could not parse generated tasks", Phase::Idle);
                } else {
                    self.emit(
                        format!("Generated {} tasks from description", tasks.len()),
                        Phase::Idle,
                    );
                }
                tasks
            }
            Err(e) => {
                warn!("Task generation failed: {:#}", e);
                self.emit(format!("Error generating tasks: {}", e), Phase::Idle);
                Vec::new()
            }
        }
    }

    async fn run_task(&self, task: &str) -> TaskEnd {
        self.control
            .send_modify(|c| c.current_task = Some(task.to_string()));
        lock(&self.progress).start_task();
        self.emit(format!("Starting task: {}", task), Phase::Idle);

        let mut study_output: Option<String> = None;
        let mut user_context: Option<String> = None;
        let mut phase = Phase::Idle.next(Transition::TaskSelected);

        while let Some(current) = phase.filter(|p| p.is_working()) {
            if !self.wait_at_boundary().await {
                return TaskEnd::Stopped;
            }
            let pending = lock(&self.user_input).take();
            if pending.is_some() {
                user_context = pending;
            }

            self.set_phase(current);
            let outcome = self
                .run_phase(current, task, study_output.as_deref(), user_context.as_deref())
                .await;

            if self.stop_requested() {
                return TaskEnd::Stopped;
            }

            match &outcome {
                PhaseOutcome::Failed { error, .. } => {
                    return TaskEnd::Failed {
                        phase: current,
                        error: error.clone(),
                    };
                }
                PhaseOutcome::Completed(output) | PhaseOutcome::CompletedWithWarning { output, .. } => {
                    if current == Phase::Study {
                        study_output = Some(output.text.clone());
                    }
                }
            }

            self.record_file_changes(current);

            if self.control().mode == LoopMode::PhaseByPhase {
                self.control.send_modify(|c| c.is_paused = true);
                self.emit(format!("Paused after {} phase", current), current);
            }

            phase = current.next(Transition::PhaseDone);
        }

        TaskEnd::Done
    }

    fn record_file_changes(&self, phase: Phase) {
        let changes = lock(&self.tracker).update_baseline();
        if !changes.created.is_empty() || !changes.modified.is_empty() {
            self.emit(
                format!(
                    "Files changed: {} created, {} modified",
                    changes.created.len(),
                    changes.modified.len()
                ),
                phase,
            );
        }
    }

    /// Run one phase under the retry policy and record its outcome.
    async fn run_phase(
        &self,
        phase: Phase,
        task: &str,
        study_output: Option<&str>,
        user_context: Option<&str>,
    ) -> PhaseOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        lock(&self.progress).start_phase(phase);

        let report = |message: String| self.emit(message, phase);
        let ctx = PhaseContext {
            client: self.client.as_ref(),
            task,
            study_output,
            user_context,
            task_list: &self.task_list,
            workspace: &self.workspace,
            validator: &self.validator,
            validation: &self.config.validation,
            progress: &self.progress,
            report: &report,
        };

        let mut retry_count = 0;
        let outcome = loop {
            let error = match phases::execute(phase, &ctx).await {
                Ok(output) => break PhaseOutcome::Completed(output),
                Err(e) => e.to_string(),
            };

            let decision = self.policy.classify_and_decide(&error, phase, retry_count);
            let class = FailureClass::classify(&error);

            if decision.is_critical {
                error!("{} phase failed with critical {} error: {}", phase.label(), class, error);
                self.emit(format!("Critical error in {}: {}", phase.label(), error), Phase::Error);
                break PhaseOutcome::Failed {
                    error,
                    critical: true,
                };
            }

            if decision.should_retry {
                warn!(
                    "{} phase failed ({} error), retrying in {:?} ({}/{})",
                    phase.label(),
                    class,
                    decision.delay,
                    retry_count + 1,
                    self.policy.max_retries()
                );
                self.emit(
                    format!(
                        "{} failed: {}. Retrying ({}/{})",
                        phase.label(),
                        error,
                        retry_count + 1,
                        self.policy.max_retries()
                    ),
                    phase,
                );
                if !self.sleep_unless_stopped(decision.delay).await {
                    break PhaseOutcome::Failed {
                        error,
                        critical: false,
                    };
                }
                retry_count += 1;
                continue;
            }

            if self.policy.continue_on_non_critical() {
                let warning = format!(
                    "{} failed after {} retries: {}",
                    phase.label(),
                    retry_count,
                    error
                );
                warn!("{}, continuing", warning);
                self.emit(format!("Warning: {}", warning), phase);
                break PhaseOutcome::CompletedWithWarning {
                    output: PhaseOutput::default(),
                    warning,
                };
            }

            error!("{} phase failed after {} retries: {}", phase.label(), retry_count, error);
            break PhaseOutcome::Failed {
                error,
                critical: false,
            };
        };

        lock(&self.progress).finish_phase(phase, clock.elapsed(), outcome.is_success());
        lock(&self.history).push(PhaseExecutionRecord::from_outcome(
            phase,
            task,
            started_at,
            &outcome,
            retry_count,
        ));

        outcome
    }
}

enum TaskEnd {
    Done,
    Stopped,
    Failed { phase: Phase, error: String },
}

/// Marks the loop as no longer running when the worker exits, panics included.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.control.send_modify(|c| {
            c.is_running = false;
            c.is_paused = false;
        });
    }
}

// ============================================================================
// Loop Engine
// ============================================================================

/// Handle to the loop for one project directory.
///
/// # Example
///
/// ```rust,ignore
/// use ralph_ollama::r#loop::{LoopEngine, LoopMode};
///
/// let engine = LoopEngine::new("/path/to/project")?;
/// engine.initialize_project("Demo", "A tiny CLI", Some("Create hello.py"))?;
/// engine.start(LoopMode::NonStop)?;
/// engine.wait_until_finished().await;
/// ```
pub struct LoopEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LoopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopEngine")
            .field("root", &self.shared.root)
            .field("control", &self.shared.control())
            .finish()
    }
}

impl LoopEngine {
    /// Engine backed by the Ollama client configured in `.ralph/settings.json`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = ProjectConfig::load(&root)?;
        let client = Arc::new(OllamaClient::from_config(&config.generation));
        Ok(Self::with_config(root, config, client))
    }

    /// Engine with the project's settings and a custom generation client.
    pub fn with_client(root: impl Into<PathBuf>, client: Arc<dyn GenerationClient>) -> Result<Self> {
        let root = root.into();
        let config = ProjectConfig::load(&root)?;
        Ok(Self::with_config(root, config, client))
    }

    #[must_use]
    pub fn with_config(
        root: impl Into<PathBuf>,
        config: ProjectConfig,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        let root = root.into();
        let (control, _) = watch::channel(ControlState::default());

        let shared = Shared {
            policy: RetryPolicy::from_config(&config.retry),
            task_list: TaskList::new(&root),
            workspace: Workspace::new(&root),
            validator: CodeValidator::from_config(&root, &config.validation),
            tracker: Mutex::new(FileTracker::with_config(&root, &config.tracker)),
            progress: Mutex::new(ProgressEstimator::new(config.engine.history_window)),
            project: Mutex::new(ProjectInfo::discover(&root)),
            user_input: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            status_log: Mutex::new(VecDeque::new()),
            callback: Mutex::new(None),
            control,
            client,
            config,
            root,
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.control.borrow().is_running
    }

    /// Scaffold the project directory and remember its description.
    pub fn initialize_project(
        &self,
        name: &str,
        description: &str,
        initial_task: Option<&str>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(RalphError::AlreadyRunning);
        }
        self.shared
            .emit(format!("Initializing project: {}", name), Phase::Idle);

        let info = project::scaffold(&self.shared.root, name, description, initial_task)?;
        *lock(&self.shared.project) = info;

        self.shared
            .emit(format!("Project initialized: {}", name), Phase::Idle);
        Ok(())
    }

    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start(&self, mode: LoopMode) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RalphError::loop_error("start() requires a tokio runtime"))?;

        let mut worker = lock(&self.worker);
        let mut already_running = false;
        self.shared.control.send_modify(|c| {
            if c.is_running {
                already_running = true;
            } else {
                *c = ControlState::starting(mode);
            }
        });
        if already_running {
            return Err(RalphError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        *worker = Some(runtime.spawn(async move {
            let _guard = RunningGuard(Arc::clone(&shared));
            shared.run().await;
        }));
        drop(worker);

        self.shared
            .emit(format!("Loop started in {} mode", mode), Phase::Idle);
        Ok(())
    }

    /// Pause at the next phase boundary.
    pub fn pause(&self) {
        self.shared.control.send_modify(|c| c.is_paused = true);
        self.shared
            .emit("Loop paused", self.shared.control().current_phase);
    }

    /// Continue after a pause, optionally passing feedback into the next prompts.
    pub fn resume(&self, user_input: Option<String>) {
        let has_input = user_input.is_some();
        if let Some(input) = user_input {
            *lock(&self.shared.user_input) = Some(input);
        }
        self.shared.control.send_modify(|c| c.is_paused = false);

        let message = if has_input {
            "Loop resumed with user input"
        } else {
            "Loop resumed"
        };
        self.shared
            .emit(message, self.shared.control().current_phase);
    }

    /// Stop the worker and wait for it, bounded by `engine.stop_timeout_secs`.
    ///
    /// A generation call in flight is not cancelled; if it outlives the
    /// timeout the worker is left to finish on its own.
    pub async fn stop(&self) {
        self.shared.control.send_modify(|c| {
            c.should_stop = true;
            c.is_paused = false;
        });

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let timeout = Duration::from_secs(self.shared.config.engine.stop_timeout_secs);
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("Loop worker exited"),
                Ok(Err(e)) => warn!("Loop worker ended abnormally: {}", e),
                Err(_) => warn!(
                    "Loop worker did not stop within {}s, proceeding",
                    timeout.as_secs()
                ),
            }
        }

        self.shared.control.send_modify(|c| {
            c.is_running = false;
            c.current_phase = Phase::Idle;
        });
    }

    /// Switch modes; takes effect at the next phase boundary.
    ///
    /// Leaving phase-by-phase mode releases a pending pause.
    pub fn set_mode(&self, mode: LoopMode) {
        self.shared.control.send_modify(|c| {
            if c.mode == LoopMode::PhaseByPhase && mode == LoopMode::NonStop {
                c.is_paused = false;
            }
            c.mode = mode;
        });
        self.shared
            .emit(format!("Mode changed to {}", mode), self.shared.control().current_phase);
    }

    pub fn set_status_callback<F>(&self, callback: F)
    where
        F: Fn(&StatusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *lock(&self.shared.callback) = Some(Arc::new(callback));
    }

    /// Current state with recent history and status entries.
    #[must_use]
    pub fn get_status(&self) -> LoopStatus {
        let control = self.shared.control();
        let engine = &self.shared.config.engine;

        let phase_history = {
            let history = lock(&self.shared.history);
            let skip = history.len().saturating_sub(engine.history_window);
            history[skip..].to_vec()
        };
        let status_log = {
            let log = lock(&self.shared.status_log);
            let skip = log.len().saturating_sub(engine.status_window);
            log.iter().skip(skip).cloned().collect()
        };
        let progress = lock(&self.shared.progress).snapshot(control.current_phase);
        let files = lock(&self.shared.tracker).all_files();

        LoopStatus {
            is_running: control.is_running,
            is_paused: control.is_paused,
            mode: control.mode,
            current_phase: control.current_phase,
            current_task: control.current_task,
            phase_history,
            status_log,
            progress,
            files,
        }
    }

    /// Every phase record of this engine.
    #[must_use]
    pub fn phase_history(&self) -> Vec<PhaseExecutionRecord> {
        lock(&self.shared.history).clone()
    }

    /// Every retained status event.
    #[must_use]
    pub fn status_log(&self) -> Vec<StatusEvent> {
        lock(&self.shared.status_log).iter().cloned().collect()
    }

    /// Resolve once the worker is no longer running.
    pub async fn wait_until_finished(&self) {
        let mut rx = self.shared.control.subscribe();
        let _ = rx.wait_for(|c| !c.is_running).await;

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Loop worker ended abnormally: {}", e);
            }
        }
    }

    /// Resolve once the worker is paused at a boundary or finished.
    pub async fn wait_until_paused(&self) {
        let mut rx = self.shared.control.subscribe();
        let _ = rx.wait_for(|c| c.is_paused || !c.is_running).await;
    }
}

// ============================================================================
// Engine Registry
// ============================================================================

/// Active engines keyed by project directory, owned by the host process.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<PathBuf, Arc<LoopEngine>>>,
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing engine for `root`, or one built by `create`.
    pub fn get_or_create<F>(&self, root: &Path, create: F) -> Result<Arc<LoopEngine>>
    where
        F: FnOnce(&Path) -> Result<LoopEngine>,
    {
        let mut engines = lock(&self.engines);
        if let Some(engine) = engines.get(root) {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(create(root)?);
        engines.insert(root.to_path_buf(), Arc::clone(&engine));
        Ok(engine)
    }

    #[must_use]
    pub fn get(&self, root: &Path) -> Option<Arc<LoopEngine>> {
        lock(&self.engines).get(root).cloned()
    }

    pub fn remove(&self, root: &Path) -> Option<Arc<LoopEngine>> {
        lock(&self.engines).remove(root)
    }

    /// Projects whose engine is currently running.
    #[must_use]
    pub fn running(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = lock(&self.engines)
            .iter()
            .filter(|(_, engine)| engine.is_running())
            .map(|(root, _)| root.clone())
            .collect();
        roots.sort();
        roots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.engines).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
