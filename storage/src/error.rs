use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-entry metadata read failure. Recorded by the caller, never fatal to a walk.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum InspectionError {
    #[error("permission denied reading metadata of {path}")]
    PermissionDenied { path: PathBuf },

    #[error("{path} vanished during the walk")]
    Vanished { path: PathBuf },

    #[error("permission inspection is not supported on this platform ({path})")]
    Unsupported { path: PathBuf },

    #[error("failed to read metadata of {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl InspectionError {
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => InspectionError::Vanished { path },
            io::ErrorKind::PermissionDenied => InspectionError::PermissionDenied { path },
            _ => InspectionError::Io {
                path,
                reason: err.to_string(),
            },
        }
    }
}

/// Errors raised while walking the target tree.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum WalkError {
    #[error("invalid root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("symlink cycle back to {ancestor}")]
    CycleDetected { ancestor: PathBuf },

    #[error("unreadable: {reason}")]
    Unreadable { reason: String },
}

/// Setup failures when building a permission backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown {kind} '{name}' configured as remediation fallback")]
    UnknownPrincipal { kind: &'static str, name: String },
}
