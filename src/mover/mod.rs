//! Safe file moves.
//!
//! [`Mover`] moves one file without ever overwriting or losing data;
//! [`MovePool`] runs moves on a bounded set of worker threads and serializes
//! jobs that target the same destination directory.

mod collision;
mod error;
mod pool;
mod transfer;

pub use collision::{MAX_SUFFIX_DEFAULT, suffixed_name};
pub use error::MoveError;
pub use pool::{MoveJob, MovePool};
pub use transfer::{MoveOutcome, MoveStrategy, Mover};
