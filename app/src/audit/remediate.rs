use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{FileEntry, Grant, PermissionBackend, RemediationOutcome};

use crate::exclude::ExclusionMatcher;

/// dry-run 模式下对单个条目的预判
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preview {
    WouldRemove,
    Unsupported,
    SkippedExcluded,
}

impl std::fmt::Display for Preview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Preview::WouldRemove => write!(f, "would-remove"),
            Preview::Unsupported => write!(f, "unsupported"),
            Preview::SkippedExcluded => write!(f, "skipped-excluded"),
        }
    }
}

/// 精确移除授权；每次调用独立完成读取、校验与写入
pub struct Remediator {
    backend: Arc<dyn PermissionBackend>,
    exclusions: Arc<ExclusionMatcher>,
    root: PathBuf,
}

impl Remediator {
    pub fn new(
        backend: Arc<dyn PermissionBackend>, exclusions: Arc<ExclusionMatcher>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            exclusions,
            root: root.into(),
        }
    }

    pub fn remediate(&self, path: &Path, grants: &[Grant]) -> RemediationOutcome {
        if self.is_excluded(path) {
            log::info!("Skipping excluded {}", path.display());
            return RemediationOutcome::SkippedExcluded;
        }
        if grants.is_empty() {
            return RemediationOutcome::NotFound;
        }

        let outcome = self.backend.remove_grants(path, grants);
        log::debug!("Remediation of {}: {}", path.display(), outcome);
        outcome
    }

    /// 不做任何修改，只判断后端能否精确表达这些移除操作
    pub fn preview(&self, entry: &FileEntry, grants: &[Grant]) -> Preview {
        if self.is_excluded(&entry.path) {
            return Preview::SkippedExcluded;
        }
        if grants.iter().all(|g| self.backend.supports(entry, g)) {
            Preview::WouldRemove
        } else {
            Preview::Unsupported
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclusions.is_empty() {
            return false;
        }
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let is_dir = fs::symlink_metadata(path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            relative.push('/');
        }
        self.exclusions.matches(&relative)
    }
}
