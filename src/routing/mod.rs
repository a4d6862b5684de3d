//! Routing: turns stable file arrivals into move jobs.
//!
//! The [`RoutingCoordinator`] keeps one watcher per configured directory,
//! evaluates each directory's flows against what its watcher reports, and
//! publishes a [`RoutingEvent`] for everything it observes or does.

mod coordinator;
mod dedup;
mod events;

pub use coordinator::{RoutingCoordinator, WatchState};
pub use events::RoutingEvent;
