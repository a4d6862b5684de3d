//! Typed events published by the routing coordinator.

use std::fmt;
use std::path::PathBuf;

use crate::mover::MoveStrategy;

/// Everything the engine observes or does, in the order it happened.
///
/// Each event is written to the action log before it reaches subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    WatchStarted {
        directory: PathBuf,
    },
    WatchStopped {
        directory: PathBuf,
    },
    WatchRetrying {
        directory: PathBuf,
        attempt: u32,
        error: String,
    },
    /// Setup kept failing; the directory stays configured but unwatched.
    WatchDegraded {
        directory: PathBuf,
        error: String,
    },
    FileObserved {
        directory: PathBuf,
        path: PathBuf,
    },
    MatchFound {
        directory: PathBuf,
        path: PathBuf,
        pattern: String,
        destination: PathBuf,
    },
    NoMatch {
        directory: PathBuf,
        path: PathBuf,
    },
    /// A file the engine placed in this directory would be routed in a cycle.
    LoopSuppressed {
        directory: PathBuf,
        path: PathBuf,
    },
    MoveSucceeded {
        directory: PathBuf,
        source: PathBuf,
        destination: PathBuf,
        strategy: MoveStrategy,
    },
    MoveFailed {
        directory: PathBuf,
        source: PathBuf,
        destination_dir: PathBuf,
        error: String,
    },
}

impl RoutingEvent {
    /// The watched directory the event concerns.
    pub fn directory(&self) -> &PathBuf {
        match self {
            Self::WatchStarted { directory }
            | Self::WatchStopped { directory }
            | Self::WatchRetrying { directory, .. }
            | Self::WatchDegraded { directory, .. }
            | Self::FileObserved { directory, .. }
            | Self::MatchFound { directory, .. }
            | Self::NoMatch { directory, .. }
            | Self::LoopSuppressed { directory, .. }
            | Self::MoveSucceeded { directory, .. }
            | Self::MoveFailed { directory, .. } => directory,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::MoveFailed { .. } | Self::WatchDegraded { .. } | Self::WatchRetrying { .. }
        )
    }
}

impl fmt::Display for RoutingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WatchStarted { directory } => {
                write!(f, "Watching directory {}", directory.display())
            }
            Self::WatchStopped { directory } => {
                write!(f, "Stopped watching {}", directory.display())
            }
            Self::WatchRetrying {
                directory,
                attempt,
                error,
            } => write!(
                f,
                "Cannot watch {} (attempt {attempt}), retrying: {error}",
                directory.display()
            ),
            Self::WatchDegraded { directory, error } => write!(
                f,
                "Gave up watching {}: {error}",
                directory.display()
            ),
            Self::FileObserved { path, .. } => write!(f, "Found file {}", path.display()),
            Self::MatchFound {
                path,
                pattern,
                destination,
                ..
            } => write!(
                f,
                "Matched {} with '{pattern}' -> {}",
                path.display(),
                destination.display()
            ),
            Self::NoMatch { path, .. } => {
                write!(f, "No flow matches {}, leaving it in place", path.display())
            }
            Self::LoopSuppressed { path, .. } => write!(
                f,
                "Not routing {} again: it was already routed through this directory",
                path.display()
            ),
            Self::MoveSucceeded {
                source,
                destination,
                strategy,
                ..
            } => match strategy {
                MoveStrategy::Renamed => {
                    write!(f, "Moved {} to {}", source.display(), destination.display())
                }
                MoveStrategy::Copied => write!(
                    f,
                    "Moved {} to {} (copied across volumes)",
                    source.display(),
                    destination.display()
                ),
                MoveStrategy::InPlace => {
                    write!(f, "{} is already in its destination", source.display())
                }
            },
            Self::MoveFailed {
                source,
                destination_dir,
                error,
                ..
            } => write!(
                f,
                "Failed to move {} to {}: {error}",
                source.display(),
                destination_dir.display()
            ),
        }
    }
}
