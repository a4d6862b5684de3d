//! Per-directory file watching.
//!
//! Each [`DirectoryWatcher`] owns one non-recursive `notify` handle and a
//! producer thread that turns raw filesystem events into [`FileEvent`]s once
//! a file has been quiet for the configured window.
//!
//! ```text
//! notify callback ──raw──> producer thread ──FileEvent──> bounded channel
//!                            (Debouncer +
//!                             stability check)
//! ```

mod debouncer;
mod directory;
mod error;

pub use debouncer::Debouncer;
pub use directory::{DirectoryWatcher, FileEvent};
pub use error::WatchError;
