//! Prompts and execution for the four working phases.
//!
//! [`execute`] is the single dispatch point: it maps a [`Phase`] to its
//! handler and returns a [`PhaseOutput`] or the error that ended the attempt.
//! Retries and history are the engine's concern.

use crate::config::ValidationConfig;
use crate::error::{RalphError, Result};
use crate::llm::{Generation, GenerationClient, GenerationRequest};
use crate::quality::{is_test_file, CodeValidator};
use crate::r#loop::extract::{extract_files, GeneratedFile};
use crate::r#loop::progress::ProgressEstimator;
use crate::r#loop::state::Phase;
use crate::r#loop::status::PhaseOutput;
use crate::r#loop::task_list::TaskList;
use crate::r#loop::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

// ============================================================================
// Prompts
// ============================================================================

pub const STUDY_SYSTEM_PROMPT: &str = "You are Ralph, an autonomous AI development agent.
Your role is to study and understand tasks before implementing them.

Analyze the task and provide:
1. What needs to be done
2. Key requirements
3. Dependencies or prerequisites
4. Implementation approach

Be concise and focused.";

pub const IMPLEMENT_SYSTEM_PROMPT: &str = "You are Ralph, an autonomous AI development agent.
Your role is to implement code and create files based on tasks.

When implementing:
1. Create necessary files and directories
2. Write clean, well-structured code
3. Follow best practices
4. Include appropriate comments
5. Handle errors appropriately

Provide code blocks with file paths clearly marked.";

pub const TEST_SYSTEM_PROMPT: &str = "You are Ralph, an autonomous AI development agent.
Your role is to test and validate implementations.

Analyze the implementation and provide:
1. Test cases that should be run
2. Expected outcomes
3. Potential issues or edge cases
4. Validation steps

Be concise and practical.";

pub const TASK_GENERATION_SYSTEM_PROMPT: &str = "You are Ralph, an autonomous AI development agent.
Your role is to break down project ideas into actionable tasks.

Given a project description, generate 3-5 specific, actionable tasks that need to be completed.
Tasks should be:
- Specific and clear
- Actionable (can be implemented)
- Ordered logically (most important first)
- Focused on creating deliverables or core functionality

Return ONLY a list of tasks, one per line, without numbering or bullet points.
Each task should be a single line describing what needs to be done.";

fn user_context_section(user_context: Option<&str>) -> String {
    match user_context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("\nUser Feedback:\n{}\n", context),
        None => String::new(),
    }
}

#[must_use]
pub fn study_request(task: &str, user_context: Option<&str>) -> GenerationRequest {
    let prompt = format!(
        "Study and analyze this task:\n\n{}\n{}\nProvide a clear analysis of what needs to be done, key requirements, and an implementation approach.",
        task,
        user_context_section(user_context)
    );
    GenerationRequest::new(prompt)
        .with_system_prompt(STUDY_SYSTEM_PROMPT)
        .with_task_type("code-review")
}

#[must_use]
pub fn implement_request(
    task: &str,
    study_output: Option<&str>,
    user_context: Option<&str>,
) -> GenerationRequest {
    let mut prompt = format!("Task: {}\n", task);
    if let Some(study) = study_output.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\nStudy Analysis:\n{}\n", study));
    }
    prompt.push_str(&user_context_section(user_context));
    prompt.push_str(
        "\nImplement this task. Provide the code with clear file paths. Format your response as:\n\n```path/to/file.py\n# code here\n```\n\nFor multiple files, provide each file separately.",
    );

    GenerationRequest::new(prompt)
        .with_system_prompt(IMPLEMENT_SYSTEM_PROMPT)
        .with_task_type("implementation")
}

#[must_use]
pub fn test_request(task: &str) -> GenerationRequest {
    let prompt = format!(
        "For this task:\n\n{}\n\nProvide test cases and validation steps. If tests exist, suggest running them. If not, suggest what tests should be created.",
        task
    );
    GenerationRequest::new(prompt)
        .with_system_prompt(TEST_SYSTEM_PROMPT)
        .with_task_type("testing")
}

#[must_use]
pub fn task_generation_request(project_name: Option<&str>, description: &str) -> GenerationRequest {
    let prompt = format!(
        "Project Name: {}\n\nProject Description:\n{}\n\nGenerate 3-5 specific, actionable tasks to get started with this project.\nList one task per line, without numbering or bullets.",
        project_name.unwrap_or("Unknown"),
        description
    );
    GenerationRequest::new(prompt)
        .with_system_prompt(TASK_GENERATION_SYSTEM_PROMPT)
        .with_task_type("implementation")
}

// ============================================================================
// Execution
// ============================================================================

/// Everything a phase needs from the engine for one attempt.
pub struct PhaseContext<'a> {
    pub client: &'a dyn GenerationClient,
    pub task: &'a str,
    pub study_output: Option<&'a str>,
    pub user_context: Option<&'a str>,
    pub task_list: &'a TaskList,
    pub workspace: &'a Workspace,
    pub validator: &'a CodeValidator,
    pub validation: &'a ValidationConfig,
    pub progress: &'a Mutex<ProgressEstimator>,
    /// Emits an intermediate status message.
    pub report: &'a (dyn Fn(String) + Send + Sync),
}

impl PhaseContext<'_> {
    fn with_progress<R>(&self, f: impl FnOnce(&mut ProgressEstimator) -> R) -> R {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut progress)
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        self.client
            .generate(request)
            .await
            .map_err(|e| RalphError::generation(format!("{:#}", e)))
    }
}

/// Run one attempt of `phase`.
pub async fn execute(phase: Phase, ctx: &PhaseContext<'_>) -> Result<PhaseOutput> {
    match phase {
        Phase::Study => study(ctx).await,
        Phase::Implement => implement(ctx).await,
        Phase::Test => test(ctx).await,
        Phase::Update => update(ctx),
        other => Err(RalphError::loop_error(format!(
            "{} is not an executable phase",
            other
        ))),
    }
}

async fn study(ctx: &PhaseContext<'_>) -> Result<PhaseOutput> {
    (ctx.report)(format!("Studying task: {}", ctx.task));
    let generation = ctx
        .generate(study_request(ctx.task, ctx.user_context))
        .await?;

    (ctx.report)(format!(
        "Study complete: {} chars",
        generation.content.chars().count()
    ));
    Ok(PhaseOutput::text(generation.content))
}

async fn implement(ctx: &PhaseContext<'_>) -> Result<PhaseOutput> {
    (ctx.report)(format!("Implementing task: {}", ctx.task));
    let generation = ctx
        .generate(implement_request(ctx.task, ctx.study_output, ctx.user_context))
        .await?;

    let files = extract_files(&generation.content);
    ctx.with_progress(|p| p.set_files_expected(files.len()));
    (ctx.report)(format!("Extracted {} files from response", files.len()));

    let mut output = PhaseOutput::text(generation.content.clone());
    let mut wrote_test = false;

    for file in &files {
        let relative = match stage_file(ctx, file).await {
            Ok(relative) => relative,
            Err(e) if e.is_content_error() => {
                warn!("Skipping {}: {}", file.path, e);
                (ctx.report)(format!("Skipped {}: {}", file.path, e));
                output.files_skipped.push(file.path.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        ctx.with_progress(ProgressEstimator::record_file_written);
        let key = relative_key(&relative);
        (ctx.report)(format!("Created file: {}", key));

        if ctx.validation.execute_files && ctx.validator.is_executable(&relative) {
            let result = ctx.validator.execute_file(&relative).await;
            if result.success {
                debug!("Executed {} successfully", key);
            } else if let Some(error) = &result.error {
                (ctx.report)(format!("Execution of {} failed: {}", key, error));
            }
        }

        wrote_test |= is_test_file(&relative);
        output.files_written.push(key);
    }

    if wrote_test && ctx.validation.run_tests {
        let run = ctx.validator.run_tests().await;
        match &run.error {
            Some(error) => (ctx.report)(format!("Test run skipped: {}", error)),
            None => (ctx.report)(format!(
                "Tests: {} passed, {} failed",
                run.passed, run.failed
            )),
        }
        output.test_run = Some(run);
    }

    (ctx.report)(format!(
        "Implementation complete: {} files written",
        output.files_written.len()
    ));
    Ok(output)
}

/// Validate one generated file and write it under the project root.
async fn stage_file(ctx: &PhaseContext<'_>, file: &GeneratedFile) -> Result<PathBuf> {
    let checked = ctx.validator.validate_file(&file.path, &file.content).await;
    for warning in &checked.warnings {
        debug!("{}: {}", file.path, warning);
    }
    if !checked.should_write() {
        return Err(RalphError::validation(&file.path, checked.errors));
    }
    ctx.workspace.write_file(file)
}

async fn test(ctx: &PhaseContext<'_>) -> Result<PhaseOutput> {
    (ctx.report)(format!("Testing task: {}", ctx.task));
    let generation = ctx.generate(test_request(ctx.task)).await?;

    (ctx.report)(format!(
        "Test analysis complete: {} chars",
        generation.content.chars().count()
    ));
    Ok(PhaseOutput::text(generation.content))
}

fn update(ctx: &PhaseContext<'_>) -> Result<PhaseOutput> {
    (ctx.report)(format!("Updating status for task: {}", ctx.task));

    let text = if ctx.task_list.mark_complete(ctx.task)? {
        format!("Task '{}' marked as complete", ctx.task)
    } else {
        format!("Task '{}' not found in {}", ctx.task, ctx.task_list.path().display())
    };

    (ctx.report)("Status updated: task marked complete".to_string());
    Ok(PhaseOutput::text(text))
}

fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
