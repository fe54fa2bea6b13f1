//! Task list store backed by `@fix_plan.md`.
//!
//! The document is plain markdown edited by humans and by the loop alike, so
//! every operation here works line by line and leaves bytes it does not own
//! untouched.

use crate::error::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// File name of the task list, relative to the project root.
pub const FIX_PLAN_FILE: &str = "@fix_plan.md";

const HIGH_PRIORITY: &str = "## High Priority";
const HIGH_PRIORITY_NOTE: &str = "> Critical functionality, blocking work, or core features";

/// Headers that open a section whose tasks are picked up by the loop.
const PRIORITY_HEADERS: [&str; 3] = [HIGH_PRIORITY, "## Medium Priority", "## Low Priority"];

/// Generated lines this short are noise, not tasks.
const MIN_TASK_LEN: usize = 10;

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s*").expect("Failed to compile bullet regex"));
static NUMBERING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s*").expect("Failed to compile numbering regex"));

/// Render a fresh task list document.
///
/// `initial_task`, when given, is the only High Priority entry.
#[must_use]
pub fn render_template(initial_task: Option<&str>) -> String {
    let today = chrono::Local::now().format("%Y-%m-%d");
    let initial = match initial_task {
        Some(task) if !task.trim().is_empty() => format!("- [ ] {}\n\n", task.trim()),
        _ => String::new(),
    };

    format!(
        "# Fix Plan - Prioritized Task List

> This file tracks prioritized tasks for the Ralph autonomous development workflow.
> Tasks are marked with `[ ]` for incomplete and `[x]` for complete.

**Last Updated:** {today}

---

{HIGH_PRIORITY}

{HIGH_PRIORITY_NOTE}

{initial}---

## Medium Priority

> Important but not blocking, enhancements, nice-to-have features

---

## Low Priority

> Polish, optimizations, future enhancements

---

## Completed Tasks

> Moved here for reference after completion

---
"
    )
}

/// Turn a model response into task lines.
///
/// One task per line; bullets (`-`, `*`, `•`) and numbering (`1.`, `2)`) are
/// stripped and lines of ten characters or fewer are dropped.
#[must_use]
pub fn parse_generated_tasks(text: &str) -> Vec<String> {
    text.trim()
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let line = BULLET.replace(line, "");
            let line = NUMBERING.replace(&line, "").trim().to_string();
            (line.chars().count() > MIN_TASK_LEN).then_some(line)
        })
        .collect()
}

/// Recover a project description from `README.md`.
///
/// Takes the non-empty lines after the first `# ` title up to the next
/// header, joined with spaces.
#[must_use]
pub fn description_from_readme(root: &Path) -> Option<String> {
    let content = std::fs::read_to_string(root.join("README.md")).ok()?;
    let mut lines = content.lines().skip_while(|line| !line.starts_with("# "));
    lines.next()?;

    let description = lines
        .take_while(|line| !line.starts_with('#'))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    (!description.is_empty()).then_some(description)
}

/// The `@fix_plan.md` document of one project.
#[derive(Debug, Clone)]
pub struct TaskList {
    path: PathBuf,
}

impl TaskList {
    /// Task list for the project rooted at `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(FIX_PLAN_FILE),
        }
    }

    /// Path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the document exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Incomplete tasks in document order across the High, Medium and Low
    /// Priority sections.
    ///
    /// A missing document yields an empty list.
    pub fn read_incomplete_tasks(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;

        let mut tasks = Vec::new();
        let mut in_priority_section = false;

        for line in content.lines() {
            let line = line.trim();
            if PRIORITY_HEADERS.iter().any(|header| line.starts_with(header)) {
                in_priority_section = true;
                continue;
            }
            if line.starts_with("##") {
                in_priority_section = false;
                continue;
            }
            if in_priority_section {
                if let Some(rest) = line.strip_prefix("- [ ]") {
                    let task = rest.trim();
                    if !task.is_empty() {
                        tasks.push(task.to_string());
                    }
                }
            }
        }

        Ok(tasks)
    }

    /// First incomplete task, if any.
    pub fn next_task(&self) -> Result<Option<String>> {
        Ok(self.read_incomplete_tasks()?.into_iter().next())
    }

    /// Insert `- [ ] task` lines at the end of the High Priority section.
    ///
    /// Creates the document from the template when missing. Returns `false`
    /// without touching anything when `tasks` is empty.
    pub fn append_tasks(&self, tasks: &[String]) -> Result<bool> {
        if tasks.is_empty() {
            return Ok(false);
        }

        let content = if self.path.exists() {
            std::fs::read_to_string(&self.path)?
        } else {
            render_template(None)
        };

        let new_content = insert_into_high_priority(&content, tasks);
        std::fs::write(&self.path, new_content)?;
        debug!("Appended {} task(s) to {}", tasks.len(), self.path.display());
        Ok(true)
    }

    /// Flip the first `- [ ] <task>` to `- [x] <task>`.
    ///
    /// Returns `false`, leaving the file untouched, when the document is
    /// missing or the task is not found.
    pub fn mark_complete(&self, task: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let pattern = Regex::new(&format!(r"- \[ \] {}", regex::escape(task)))
            .map_err(|e| crate::error::RalphError::loop_error(e.to_string()))?;

        let Some(found) = pattern.find(&content) else {
            return Ok(false);
        };

        let mut new_content = String::with_capacity(content.len());
        new_content.push_str(&content[..found.start()]);
        new_content.push_str("- [x] ");
        new_content.push_str(task);
        new_content.push_str(&content[found.end()..]);

        std::fs::write(&self.path, new_content)?;
        Ok(true)
    }
}

/// Line-level insertion used by [`TaskList::append_tasks`].
fn insert_into_high_priority(content: &str, tasks: &[String]) -> String {
    let task_lines = tasks.iter().map(|task| format!("- [ ] {}", task));

    let mut out: Vec<String> = Vec::new();
    let mut high_found = false;
    let mut after_description = false;
    let mut added = false;

    for line in content.split('\n') {
        let trimmed = line.trim();

        if !high_found && trimmed == HIGH_PRIORITY {
            high_found = true;
            out.push(line.to_string());
            continue;
        }

        if high_found && !after_description {
            out.push(line.to_string());
            if trimmed.starts_with('>') {
                after_description = true;
            }
            continue;
        }

        if high_found && !added && (trimmed.starts_with("---") || trimmed.starts_with("##")) {
            out.extend(task_lines.clone());
            out.push(String::new());
            added = true;
        }

        out.push(line.to_string());
    }

    if !high_found {
        out.push(format!("\n{HIGH_PRIORITY}\n\n{HIGH_PRIORITY_NOTE}\n"));
        out.extend(task_lines);
        out.push("\n---\n".to_string());
    } else if !added {
        // High Priority runs to the end of the document
        out.extend(task_lines);
        out.push(String::new());
    }

    out.join("\n")
}
