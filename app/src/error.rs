use std::path::PathBuf;
use storage::{BackendError, WalkError};
use thiserror::Error;

/// 审计启动阶段的致命错误，遍历开始前返回
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<WalkError> for AuditError {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::InvalidRoot { path, reason } => AuditError::InvalidRoot { path, reason },
            other => AuditError::InvalidInput(other.to_string()),
        }
    }
}

impl From<AuditError> for utils::error::Error {
    fn from(err: AuditError) -> Self {
        utils::error::Error::with_source("Audit setup failed", Box::new(err))
    }
}
