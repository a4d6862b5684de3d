//! Flow configuration: watched directories and their ordered routing rules.
//!
//! A [`FlowStore`] owns every configured directory. Each directory owns an
//! ordered list of [`Flow`]s; the first flow whose [`Pattern`] matches a
//! file name decides where that file goes.

mod error;
mod pattern;
mod snapshot;
mod store;

pub use error::{StoreError, StoreResult};
pub use pattern::Pattern;
pub use snapshot::{SNAPSHOT_VERSION, StoreSnapshot};
pub use store::{DIRECTORIES_KEY, DirectorySummary, Flow, FlowStore};
pub(crate) use store::lookup_key;
