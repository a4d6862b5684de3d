//! Error types for file moves.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Runtime move failures. In every case the source file is still in place.
#[derive(Error, Debug)]
pub enum MoveError {
    #[error("Source {source_path} is unavailable: {error}")]
    SourceUnavailable {
        source_path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("Destination {destination} is unavailable: {error}")]
    DestinationUnavailable {
        destination: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("No free name for {source_path} in {destination} after {attempts} attempts")]
    CollisionUnresolved {
        source_path: PathBuf,
        destination: PathBuf,
        attempts: u32,
    },

    #[error("Move of {source_path} to {destination} failed part way; copy discarded: {error}")]
    PartialMoveFailure {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: io::Error,
    },
}

impl MoveError {
    /// The file that was being moved, if the error names one.
    pub fn source_path(&self) -> Option<&PathBuf> {
        match self {
            Self::SourceUnavailable { source_path, .. }
            | Self::CollisionUnresolved { source_path, .. }
            | Self::PartialMoveFailure { source_path, .. } => Some(source_path),
            Self::DestinationUnavailable { .. } => None,
        }
    }
}
