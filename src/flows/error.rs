//! Error types for flow configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-layer errors. None of them leave a partial mutation behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Directory already configured: {path}")]
    DuplicatePath { path: PathBuf },

    #[error("Directory not configured: {path}")]
    NotFound { path: PathBuf },

    #[error("Directory {path} has no flow at index {index} ({len} flows)")]
    FlowNotFound {
        path: PathBuf,
        index: usize,
        len: usize,
    },

    #[error("Directory {path} still has {flows} flow(s); remove them first")]
    DirectoryInUse { path: PathBuf, flows: usize },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid destination '{destination}': {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("Invalid directory path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Persisted configuration is corrupt: {reason}")]
    CorruptState { reason: String },
}

impl StoreError {
    /// True for both flavours of the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::FlowNotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
