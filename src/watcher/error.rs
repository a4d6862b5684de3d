//! Error types for directory watching.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Cannot watch {path}: {reason}")]
    SetupFailed { path: PathBuf, reason: String },

    #[error("Watcher for {path} is already running")]
    AlreadyRunning { path: PathBuf },
}

impl WatchError {
    pub(crate) fn setup(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::SetupFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
