//! Filesystem walk: roots, work items and the producer side of a scan.

use crate::error::{Result, TrawlError};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory names skipped by default.
pub const DEFAULT_EXCLUDE_DIR_NAMES: &[&str] = &[".git", "node_modules", "__pycache__"];

/// Normalize a relative path to `/`-joined components.
fn normalize_path_to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A root to scan: where it lives on this host, and the prefix its paths
/// carry in rules and records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoot {
    pub logical: String,
    pub physical: PathBuf,
}

impl ScanRoot {
    pub fn new(logical: impl Into<String>, physical: impl Into<PathBuf>) -> Self {
        let logical = crate::rules::compiler::normalize_separators(&logical.into());
        Self {
            logical: logical.trim_end_matches('/').to_string(),
            physical: physical.into(),
        }
    }

    /// Logical path of an entry below this root. An empty `relative` is
    /// the root itself.
    pub fn logical_path(&self, relative: &Path) -> String {
        let relative = normalize_path_to_forward_slashes(relative);
        if self.logical.is_empty() {
            relative
        } else if relative.is_empty() {
            self.logical.clone()
        } else {
            format!("{}/{}", self.logical, relative)
        }
    }

    /// Logical path of a physical path found while walking this root.
    /// Anything outside the root maps to the root itself.
    pub fn logical_of(&self, physical: &Path) -> String {
        match physical.strip_prefix(&self.physical) {
            Ok(relative) => self.logical_path(relative),
            Err(_) => self.logical.clone(),
        }
    }

    /// Whether `logical` names this root or something below it.
    pub fn contains(&self, logical: &str) -> bool {
        path_covers(&self.logical, logical)
    }
}

/// Whether logical path `path` is `prefix` or lies below it. The empty
/// prefix covers everything.
pub fn path_covers(prefix: &str, path: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Stat snapshot of one entry, taken when it is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl EntryMeta {
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            mode: file_mode(meta),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_dir: meta.is_dir(),
        }
    }
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

/// One discovered file or directory, in flight to a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub logical: String,
    pub physical: PathBuf,
    pub meta: EntryMeta,
    pub queued_at: DateTime<Utc>,
}

/// Walk behaviour.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub follow_symlinks: bool,
    pub exclude_dir_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            exclude_dir_names: DEFAULT_EXCLUDE_DIR_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A root that could not be walked at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootFailure {
    pub root: String,
    pub message: String,
}

/// An entry that could not be read mid-walk. `path` is logical; nothing
/// below it was seen this scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkIssue {
    pub path: String,
    pub message: String,
}

/// What the producer did.
#[derive(Debug, Default)]
pub struct WalkReport {
    pub dispatched: u64,
    pub failed_roots: Vec<RootFailure>,
    pub issues: Vec<WalkIssue>,
}

/// Walk one root, sending the root directory and every entry below it to
/// `tx`. A root with an empty logical prefix has no path of its own and is
/// not sent.
///
/// Returns `WalkFailure` if the root itself is unusable. Unreadable entries
/// are recorded in `report` and skipped. Returns `InvalidState` if every
/// receiver is gone.
pub fn walk_root(
    root: &ScanRoot,
    options: &WalkOptions,
    tx: &Sender<WorkItem>,
    report: &mut WalkReport,
) -> Result<()> {
    let root_meta = fs::metadata(&root.physical).map_err(|e| TrawlError::WalkFailure {
        root: root.physical.display().to_string(),
        message: e.to_string(),
    })?;
    if !root_meta.is_dir() {
        return Err(TrawlError::WalkFailure {
            root: root.physical.display().to_string(),
            message: "not a directory".to_string(),
        });
    }

    let exclude = &options.exclude_dir_names;
    let walker = WalkDir::new(&root.physical)
        .follow_links(options.follow_symlinks)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && exclude
                        .iter()
                        .any(|name| e.file_name().to_string_lossy() == name.as_str()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| root.logical_of(p))
                    .unwrap_or_else(|| root.logical.clone());
                warn!(path = %path, error = %e, "Skipping unreadable entry");
                report.issues.push(WalkIssue {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if entry.depth() == 0 && root.logical.is_empty() {
            continue;
        }

        let logical = root.logical_of(entry.path());
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %logical, error = %e, "Skipping entry without metadata");
                report.issues.push(WalkIssue {
                    path: logical,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let item = WorkItem {
            logical,
            physical: entry.path().to_path_buf(),
            meta: EntryMeta::from_metadata(&meta),
            queued_at: Utc::now(),
        };

        // Unbuffered: blocks until a worker takes it.
        tx.send(item)
            .map_err(|_| TrawlError::InvalidState("all scan workers exited".to_string()))?;
        report.dispatched += 1;
    }

    debug!(root = %root.physical.display(), dispatched = report.dispatched, "Root walked");
    Ok(())
}

/// Walk every root in order. A root that fails is recorded and the rest
/// continue; only a receiver shutdown aborts the walk.
pub fn walk_roots(
    roots: &[ScanRoot],
    options: &WalkOptions,
    tx: &Sender<WorkItem>,
) -> Result<WalkReport> {
    let mut report = WalkReport::default();
    for root in roots {
        match walk_root(root, options, tx, &mut report) {
            Ok(()) => {}
            Err(TrawlError::WalkFailure { root: failed, message }) => {
                warn!(root = %failed, error = %message, "Root could not be walked");
                report.failed_roots.push(RootFailure {
                    root: root.logical.clone(),
                    message,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
