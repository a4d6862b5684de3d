//! FileFlow: pattern-driven file routing.
//!
//! Watches source directories, matches new file names against ordered
//! flows, and moves matched files into their destinations.
//!
//! # Architecture
//!
//! ```text
//! Preferences ──restore──> FlowStore ──reconcile──> RoutingCoordinator
//!                              ^                       |  one DirectoryWatcher
//!                              |                       |  + evaluation worker
//!                          FileFlow (host API)         v  per directory
//!                                                   MovePool ──> Mover
//!                                                      |
//!                                         RoutingEvent v
//!                                    ActionLog + subscribers
//! ```

pub mod logging;

pub mod action_log;
pub mod config;
pub mod engine;
pub mod flows;
pub mod mover;
pub mod preferences;
pub mod routing;
pub mod watcher;

pub use action_log::ActionLog;
pub use config::Settings;
pub use engine::{DirectoryStatus, FileFlow};
pub use flows::{DirectorySummary, Flow, FlowStore, Pattern, StoreError};
pub use mover::{MoveError, MoveOutcome, Mover};
pub use preferences::{FilePreferences, MemoryPreferences, Preferences};
pub use routing::{RoutingCoordinator, RoutingEvent, WatchState};
pub use watcher::{DirectoryWatcher, FileEvent, WatchError};
