//! Project scaffolding.
//!
//! A new project gets a `README.md`, the `src/`, `tests/`, `docs/` and
//! `specs/` directories, a fresh `@fix_plan.md`, and `.ralph/project.json`
//! recording the name and description for later task generation.

use crate::error::Result;
use crate::r#loop::task_list::{description_from_readme, render_template, TaskList};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROJECT_DIRS: [&str; 4] = ["src", "tests", "docs", "specs"];

/// Name and description of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub description: Option<String>,
}

impl ProjectInfo {
    #[must_use]
    pub fn path(root: &Path) -> PathBuf {
        root.join(".ralph").join("project.json")
    }

    /// Stored info, else the directory name plus the README description.
    #[must_use]
    pub fn discover(root: &Path) -> Self {
        if let Some(info) = Self::load(root) {
            return info;
        }
        Self {
            name: root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            description: description_from_readme(root),
        }
    }

    fn load(root: &Path) -> Option<Self> {
        let content = fs::read_to_string(Self::path(root)).ok()?;
        match serde_json::from_str(&content) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Ignoring unreadable project.json: {}", e);
                None
            }
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[must_use]
pub fn render_readme(name: &str, description: &str) -> String {
    format!(
        "# {name}\n\n{description}\n\n## Project Status\n\nThis project was initialized by Ralph Loop Engine.\n\n## Getting Started\n\nSee @fix_plan.md for current tasks.\n"
    )
}

/// Create the project layout under `root`.
///
/// Overwrites `README.md` and `@fix_plan.md`; existing directories are kept.
pub fn scaffold(
    root: &Path,
    name: &str,
    description: &str,
    initial_task: Option<&str>,
) -> Result<ProjectInfo> {
    info!("Initializing project {} at {}", name, root.display());

    fs::create_dir_all(root)?;
    for dir in PROJECT_DIRS {
        fs::create_dir_all(root.join(dir))?;
    }

    fs::write(root.join("README.md"), render_readme(name, description))?;

    let task_list = TaskList::new(root);
    fs::write(task_list.path(), render_template(initial_task))?;

    let info = ProjectInfo {
        name: name.to_string(),
        description: Some(description.to_string()).filter(|d| !d.trim().is_empty()),
    };
    info.save(root)?;

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scaffold_layout() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("demo");
        scaffold(&root, "Demo", "A small demo", Some("Create hello.py")).unwrap();

        for dir in PROJECT_DIRS {
            assert!(root.join(dir).is_dir(), "{dir}");
        }
        let readme = fs::read_to_string(root.join("README.md")).unwrap();
        assert!(readme.starts_with("# Demo\n\nA small demo\n\n## Project Status"));

        let tasks = TaskList::new(&root).read_incomplete_tasks().unwrap();
        assert_eq!(tasks, vec!["Create hello.py"]);
    }

    #[test]
    fn test_scaffold_without_initial_task() {
        let temp = TempDir::new().unwrap();
        scaffold(temp.path(), "Empty", "Nothing yet", None).unwrap();
        assert!(TaskList::new(temp.path()).read_incomplete_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_project_info_round_trip_and_discovery() {
        let temp = TempDir::new().unwrap();
        scaffold(temp.path(), "Stored", "From json", None).unwrap();
        let info = ProjectInfo::discover(temp.path());
        assert_eq!(info.name, "Stored");
        assert_eq!(info.description.as_deref(), Some("From json"));

        fs::remove_file(ProjectInfo::path(temp.path())).unwrap();
        let fallback = ProjectInfo::discover(temp.path());
        assert_eq!(fallback.description.as_deref(), Some("From json"));
    }
}
