//! Confinement of generated paths under the project root.
//!
//! Generated paths are untrusted. Absolute paths are re-rooted at the project
//! directory, `.` segments are dropped, and `..` may only walk back over
//! segments the path itself introduced.

use crate::error::{RalphError, Result};
use crate::r#loop::extract::GeneratedFile;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Normalize a generated path into a relative path that stays inside the root.
///
/// # Errors
///
/// Returns [`RalphError::PathEscape`] when `..` climbs above the root or when
/// nothing is left after normalization.
pub fn confine_relative(path: &str) -> Result<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(path).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(RalphError::path_escape(path));
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    if parts.is_empty() {
        return Err(RalphError::path_escape(path));
    }

    Ok(parts.iter().collect())
}

/// The project directory generated files are written into.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a generated file, creating parent directories.
    ///
    /// Returns the confined relative path that was written.
    pub fn write_file(&self, file: &GeneratedFile) -> Result<PathBuf> {
        let relative = confine_relative(&file.path)?;
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = file.content.clone();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        std::fs::write(&target, content)?;

        debug!("Wrote {} ({} bytes)", relative.display(), file.content.len());
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_relative_path() {
        assert_eq!(confine_relative("src/main.py").unwrap(), PathBuf::from("src/main.py"));
        assert_eq!(confine_relative("./a/./b.py").unwrap(), PathBuf::from("a/b.py"));
    }

    #[test]
    fn test_absolute_path_is_rerooted() {
        assert_eq!(confine_relative("/etc/passwd").unwrap(), PathBuf::from("etc/passwd"));
    }

    #[test]
    fn test_inner_parent_dir_allowed() {
        assert_eq!(confine_relative("src/../lib/x.py").unwrap(), PathBuf::from("lib/x.py"));
    }

    #[test]
    fn test_escape_rejected() {
        let err = confine_relative("../outside.py").unwrap_err();
        assert!(matches!(err, RalphError::PathEscape { .. }));
        assert!(confine_relative("a/../../b").is_err());
        assert!(confine_relative("/").is_err());
        assert!(confine_relative("").is_err());
    }

    #[test]
    fn test_write_file_creates_parents() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path());
        let written = workspace
            .write_file(&GeneratedFile {
                path: "pkg/sub/mod.py".to_string(),
                content: "x = 1".to_string(),
            })
            .unwrap();

        assert_eq!(written, PathBuf::from("pkg/sub/mod.py"));
        let on_disk = std::fs::read_to_string(temp.path().join("pkg/sub/mod.py")).unwrap();
        assert_eq!(on_disk, "x = 1\n");
    }

    #[test]
    fn test_write_file_refuses_escape() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path().join("project"));
        let result = workspace.write_file(&GeneratedFile {
            path: "../evil.py".to_string(),
            content: "boom".to_string(),
        });
        assert!(result.is_err());
        assert!(!temp.path().join("evil.py").exists());
    }
}
