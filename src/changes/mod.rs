//! Filesystem change tracking for a project directory.
//!
//! The tracker keeps a baseline snapshot of `relative path -> mtime` and
//! reports what was created, modified or deleted since then. Snapshots are
//! one `walkdir` pass with ignored directories pruned, and are cached briefly
//! so back-to-back status queries do not rescan the tree.
//!
//! # Example
//!
//! ```rust,ignore
//! use ralph_ollama::changes::FileTracker;
//!
//! let mut tracker = FileTracker::new("/path/to/project");
//! tracker.start_tracking();
//! // ... files are written ...
//! let changes = tracker.update_baseline();
//! println!("{} created", changes.created.len());
//! ```

use crate::config::TrackerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;
use walkdir::WalkDir;

/// Relative forward-slash path to modification time.
pub type FileSnapshot = BTreeMap<String, DateTime<Utc>>;

/// Paths that changed between the baseline and the current tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    pub created: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl FileChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.created.len() + self.modified.len() + self.deleted.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Created,
    Modified,
    Deleted,
    Unchanged,
}

/// One row of [`FileTracker::all_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub status: FileStatus,
    pub exists: bool,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileMeta {
    modified: SystemTime,
    size: u64,
}

type Scan = HashMap<String, FileMeta>;

/// Tracks file creation, modification and deletion under one root.
#[derive(Debug)]
pub struct FileTracker {
    root: PathBuf,
    ignore_dirs: HashSet<String>,
    ignore_extensions: HashSet<String>,
    snapshot_ttl: Duration,
    diff_throttle: Duration,
    baseline: Scan,
    /// Metadata folded in by `update_baseline`; takes precedence over the baseline.
    tracked: HashMap<String, FileMeta>,
    /// Metadata of created files as first observed by `diff`.
    first_seen: HashMap<String, FileMeta>,
    cache: Option<(Instant, Scan)>,
    last_diff: Option<(Instant, FileChanges)>,
}

impl FileTracker {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &TrackerConfig::default())
    }

    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: &TrackerConfig) -> Self {
        Self {
            root: root.into(),
            ignore_dirs: config.ignore_dirs.iter().cloned().collect(),
            ignore_extensions: config
                .ignore_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            snapshot_ttl: Duration::from_millis(config.snapshot_ttl_ms),
            diff_throttle: Duration::from_millis(config.diff_throttle_ms),
            baseline: HashMap::new(),
            tracked: HashMap::new(),
            first_seen: HashMap::new(),
            cache: None,
            last_diff: None,
        }
    }

    /// Override the cache lifetimes.
    #[must_use]
    pub fn with_timing(mut self, snapshot_ttl: Duration, diff_throttle: Duration) -> Self {
        self.snapshot_ttl = snapshot_ttl;
        self.diff_throttle = diff_throttle;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take a fresh baseline and forget everything tracked so far.
    pub fn start_tracking(&mut self) {
        self.tracked.clear();
        self.first_seen.clear();
        self.cache = None;
        self.last_diff = None;
        self.baseline = self.scan(true);
        debug!(
            "Tracking {} files under {}",
            self.baseline.len(),
            self.root.display()
        );
    }

    /// Current files and their modification times.
    pub fn snapshot(&mut self, force_refresh: bool) -> FileSnapshot {
        self.scan(force_refresh)
            .into_iter()
            .map(|(path, meta)| (path, DateTime::<Utc>::from(meta.modified)))
            .collect()
    }

    /// Changes since the baseline. Throttled; does not move the baseline.
    pub fn diff(&mut self) -> FileChanges {
        if let Some((at, changes)) = &self.last_diff {
            if at.elapsed() < self.diff_throttle {
                return changes.clone();
            }
        }
        self.compute_diff(false)
    }

    /// Fold the current changes into the tracked state and advance the baseline.
    pub fn update_baseline(&mut self) -> FileChanges {
        let changes = self.compute_diff(true);
        let current = self.scan(false);

        for path in &changes.created {
            let meta = self
                .first_seen
                .remove(path)
                .or_else(|| current.get(path).copied());
            if let Some(meta) = meta {
                self.tracked.insert(path.clone(), meta);
            }
        }
        for path in &changes.modified {
            if let Some(meta) = current.get(path) {
                self.tracked.insert(path.clone(), *meta);
            }
        }
        for path in &changes.deleted {
            self.tracked.remove(path);
            self.first_seen.remove(path);
        }

        self.baseline = current;
        self.last_diff = None;
        changes
    }

    /// Every path in the current tree or the baseline, with its status.
    pub fn all_files(&mut self) -> Vec<FileEntry> {
        let current = self.scan(false);
        let paths: BTreeSet<&String> = current.keys().chain(self.baseline.keys()).collect();

        paths
            .into_iter()
            .map(|path| match current.get(path) {
                Some(meta) => FileEntry {
                    path: path.clone(),
                    status: if !self.baseline.contains_key(path) {
                        FileStatus::Created
                    } else if self.is_modified(path, meta) {
                        FileStatus::Modified
                    } else {
                        FileStatus::Unchanged
                    },
                    exists: true,
                    size: Some(meta.size),
                    modified_at: Some(DateTime::<Utc>::from(meta.modified)),
                },
                None => FileEntry {
                    path: path.clone(),
                    status: FileStatus::Deleted,
                    exists: false,
                    size: None,
                    modified_at: None,
                },
            })
            .collect()
    }

    fn is_modified(&self, path: &str, meta: &FileMeta) -> bool {
        let recorded = self
            .tracked
            .get(path)
            .or_else(|| self.baseline.get(path))
            .map(|m| m.modified);
        recorded.is_some_and(|recorded| meta.modified > recorded)
    }

    fn compute_diff(&mut self, force_refresh: bool) -> FileChanges {
        let current = self.scan(force_refresh);
        let mut changes = FileChanges::default();

        for (path, meta) in &current {
            if !self.baseline.contains_key(path) {
                self.first_seen.entry(path.clone()).or_insert(*meta);
                changes.created.push(path.clone());
            } else if self.is_modified(path, meta) {
                changes.modified.push(path.clone());
            }
        }
        changes.deleted = self
            .baseline
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        changes.created.sort();
        changes.modified.sort();
        changes.deleted.sort();

        self.last_diff = Some((Instant::now(), changes.clone()));
        changes
    }

    fn scan(&mut self, force_refresh: bool) -> Scan {
        if !force_refresh {
            if let Some((at, scan)) = &self.cache {
                if at.elapsed() < self.snapshot_ttl {
                    return scan.clone();
                }
            }
        }

        let scan = self.walk();
        self.cache = Some((Instant::now(), scan.clone()));
        scan
    }

    fn walk(&self) -> Scan {
        let mut scan = HashMap::new();
        if !self.root.exists() {
            return scan;
        }

        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.ignore_dirs.contains(name))
        });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ignored = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.ignore_extensions.contains(&ext.to_lowercase()));
            if ignored {
                continue;
            }

            // Stat failures (file removed mid-walk, permissions) drop the file
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let Some(relative) = relative_key(&self.root, path) else {
                continue;
            };

            scan.insert(
                relative,
                FileMeta {
                    modified,
                    size: metadata.len(),
                },
            );
        }

        scan
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}
