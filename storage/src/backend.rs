use std::path::Path;
use std::sync::Arc;

use crate::entry::{FileEntry, Grant, RemediationOutcome};
use crate::error::{BackendError, InspectionError};

/// Native access-control capability for one platform.
///
/// `inspect` never follows symlinks. `remove_grants` is self-contained: it
/// re-reads the entry, keeps only the targeted grants that are still
/// present and rewrites nothing else.
pub trait PermissionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn inspect(&self, path: &Path) -> Result<FileEntry, InspectionError>;

    /// Whether removing `grant` from `entry` can be expressed exactly.
    fn supports(&self, entry: &FileEntry, grant: &Grant) -> bool;

    fn remove_grants(&self, path: &Path, grants: &[Grant]) -> RemediationOutcome;
}

/// Who takes over ownership when an owner or owning-group grant is removed.
#[derive(Debug, Clone, Default)]
pub struct RemediationPolicy {
    pub fallback_owner: Option<String>,
    pub fallback_group: Option<String>,
}

impl RemediationPolicy {
    /// Empty strings in configuration disable the corresponding reassignment.
    pub fn from_config(fallback_owner: &str, fallback_group: &str) -> Self {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            fallback_owner: non_empty(fallback_owner),
            fallback_group: non_empty(fallback_group),
        }
    }
}

/// Backend for platforms without a native implementation.
pub struct UnsupportedBackend;

impl PermissionBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn inspect(&self, path: &Path) -> Result<FileEntry, InspectionError> {
        Err(InspectionError::Unsupported {
            path: path.to_path_buf(),
        })
    }

    fn supports(&self, _entry: &FileEntry, _grant: &Grant) -> bool {
        false
    }

    fn remove_grants(&self, _path: &Path, _grants: &[Grant]) -> RemediationOutcome {
        RemediationOutcome::UnsupportedFilesystem
    }
}

/// The native backend for the host platform, resolving principals through
/// the system user database.
#[cfg(unix)]
pub fn default_backend(
    policy: &RemediationPolicy,
) -> Result<Arc<dyn PermissionBackend>, BackendError> {
    let directory = Arc::new(crate::directory::SystemDirectory::new());
    let backend = crate::posix::PosixBackend::new(directory, policy)?;
    Ok(Arc::new(backend))
}

#[cfg(not(unix))]
pub fn default_backend(
    _policy: &RemediationPolicy,
) -> Result<Arc<dyn PermissionBackend>, BackendError> {
    log::warn!("No native permission backend for this platform, entries will be reported as unsupported");
    Ok(Arc::new(UnsupportedBackend))
}
