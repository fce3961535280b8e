//! Depth-first traversal of the audit root.
//!
//! Children are visited in name order so repeated runs over an unchanged
//! tree produce the same event sequence. The root itself is validated but
//! not yielded. With symlink following enabled, links to directories are
//! only descended when their canonical target stays inside the root, and
//! every directory is expanded at most once.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::WalkError;

/// Walk-time exclusion predicate.
pub trait PathFilter: Send + Sync {
    /// `relative` is root-relative with `/` separators; directories are
    /// queried with a trailing `/`.
    fn is_excluded(&self, relative: &str) -> bool;
}

/// Excludes nothing.
pub struct NoFilter;

impl PathFilter for NoFilter {
    fn is_excluded(&self, _relative: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub relative: String,
    pub depth: usize,
    /// Reached through a followed symlink, or is itself a symlink.
    pub via_symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    Entry(WalkEntry),
    /// Excluded by the filter. Excluded directories are not descended.
    Excluded { path: PathBuf, relative: String },
    Failed { path: PathBuf, error: WalkError },
}

impl WalkEvent {
    pub fn path(&self) -> &Path {
        match self {
            WalkEvent::Entry(entry) => &entry.path,
            WalkEvent::Excluded { path, .. } | WalkEvent::Failed { path, .. } => path,
        }
    }
}

#[cfg(unix)]
type DirKey = (u64, u64);

#[cfg(not(unix))]
type DirKey = PathBuf;

#[cfg(unix)]
fn dir_key(_path: &Path, meta: &fs::Metadata) -> Option<DirKey> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn dir_key(path: &Path, _meta: &fs::Metadata) -> Option<DirKey> {
    fs::canonicalize(path).ok()
}

#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    canonical_root: PathBuf,
    follow_symlinks: bool,
}

impl TreeWalker {
    /// Fails before any traversal when the root is missing or not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WalkError> {
        let root = root.as_ref().to_path_buf();
        let invalid = |reason: String| WalkError::InvalidRoot {
            path: root.clone(),
            reason,
        };

        let meta = fs::metadata(&root).map_err(|e| invalid(e.to_string()))?;
        if !meta.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        let canonical_root = fs::canonicalize(&root).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            root,
            canonical_root,
            follow_symlinks: false,
        })
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh traversal. Every call restarts from the root.
    pub fn walk(&self, filter: Arc<dyn PathFilter>) -> Walk {
        let inner = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .max_open(100)
            .sort_by_file_name()
            .into_iter();

        let root_key = fs::metadata(&self.root)
            .ok()
            .and_then(|meta| dir_key(&self.root, &meta));
        let mut expanded = HashSet::new();
        if let Some(key) = &root_key {
            expanded.insert(key.clone());
        }

        Walk {
            inner,
            filter,
            root: self.root.clone(),
            canonical_root: self.canonical_root.clone(),
            follow_symlinks: self.follow_symlinks,
            ancestors: vec![Ancestor {
                key: root_key,
                path: self.root.clone(),
                via_symlink: false,
            }],
            expanded,
        }
    }

    /// Stream walk events from a blocking task over a bounded channel.
    pub async fn walk_channel(
        &self, filter: Arc<dyn PathFilter>, capacity: usize,
    ) -> tokio::sync::mpsc::Receiver<WalkEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        let walker = self.clone();

        tokio::task::spawn_blocking(move || {
            for event in walker.walk(filter) {
                if tx.blocking_send(event).is_err() {
                    // receiver dropped, stop walking
                    log::debug!("Walk of {} abandoned by receiver", walker.root.display());
                    break;
                }
            }
        });

        rx
    }
}

struct Ancestor {
    key: Option<DirKey>,
    path: PathBuf,
    via_symlink: bool,
}

/// Lazy iterator over the events of one traversal.
pub struct Walk {
    inner: walkdir::IntoIter,
    filter: Arc<dyn PathFilter>,
    root: PathBuf,
    canonical_root: PathBuf,
    follow_symlinks: bool,
    /// Directory chain leading to the current position, indexed by depth.
    ancestors: Vec<Ancestor>,
    expanded: HashSet<DirKey>,
}

impl Walk {
    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn excluded(&self, relative: &str, is_dir: bool) -> bool {
        if is_dir {
            self.filter.is_excluded(&format!("{}/", relative))
        } else {
            self.filter.is_excluded(relative)
        }
    }

    fn on_entry(&mut self, entry: walkdir::DirEntry) -> WalkEvent {
        let path = entry.path().to_path_buf();
        let depth = entry.depth();
        let is_dir = entry.file_type().is_dir();
        self.ancestors.truncate(depth);
        let via_symlink = entry.path_is_symlink() || self.parent_via_symlink();
        let relative = self.relative(&path);

        if self.excluded(&relative, is_dir) {
            if is_dir {
                self.inner.skip_current_dir();
            }
            log::debug!("Excluded {}", relative);
            return WalkEvent::Excluded { path, relative };
        }

        let event = WalkEvent::Entry(WalkEntry {
            path: path.clone(),
            relative,
            depth,
            via_symlink,
        });
        if !is_dir {
            return event;
        }

        if entry.path_is_symlink() && !self.inside_root(&path) {
            log::debug!("Not following {} outside of the root", path.display());
            self.inner.skip_current_dir();
            return event;
        }

        let key = match entry.metadata() {
            Ok(meta) => dir_key(&path, &meta),
            Err(_) => None,
        };
        let Some(key) = key else {
            self.ancestors.push(Ancestor {
                key: None,
                path,
                via_symlink,
            });
            return event;
        };

        if let Some(ancestor) = self
            .ancestors
            .iter()
            .find(|a| a.key.as_ref() == Some(&key))
        {
            let ancestor = ancestor.path.clone();
            self.inner.skip_current_dir();
            log::warn!("Cycle at {} back to {}", path.display(), ancestor.display());
            return WalkEvent::Failed {
                path,
                error: WalkError::CycleDetected { ancestor },
            };
        }

        if !self.expanded.insert(key.clone()) {
            // same directory already walked through another path
            self.inner.skip_current_dir();
            return event;
        }

        self.ancestors.push(Ancestor {
            key: Some(key),
            path,
            via_symlink,
        });
        event
    }

    fn on_error(&mut self, err: walkdir::Error) -> WalkEvent {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        if let Some(ancestor) = err.loop_ancestor() {
            log::warn!("Cycle at {} back to {}", path.display(), ancestor.display());
            return WalkEvent::Failed {
                path,
                error: WalkError::CycleDetected {
                    ancestor: ancestor.to_path_buf(),
                },
            };
        }

        // a dangling link under follow mode is still an entry to inspect
        let dangling = self.follow_symlinks
            && fs::symlink_metadata(&path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
        if dangling {
            let relative = self.relative(&path);
            if self.excluded(&relative, false) {
                return WalkEvent::Excluded { path, relative };
            }
            return WalkEvent::Entry(WalkEntry {
                path,
                relative,
                depth: err.depth(),
                via_symlink: true,
            });
        }

        log::warn!("Failed to read {}: {}", path.display(), err);
        WalkEvent::Failed {
            path,
            error: WalkError::Unreadable {
                reason: err.to_string(),
            },
        }
    }

    fn parent_via_symlink(&self) -> bool {
        self.ancestors.last().map_or(false, |a| a.via_symlink)
    }

    fn inside_root(&self, path: &Path) -> bool {
        fs::canonicalize(path)
            .map(|target| target.starts_with(&self.canonical_root))
            .unwrap_or(false)
    }
}

impl Iterator for Walk {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        match self.inner.next()? {
            Ok(entry) => Some(self.on_entry(entry)),
            Err(err) => Some(self.on_error(err)),
        }
    }
}
