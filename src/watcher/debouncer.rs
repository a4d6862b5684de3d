//! Quiescence tracking for newly appearing files.
//!
//! Downloads and editors write files in bursts (create, several writes,
//! rename). A path only becomes ready once no event has touched it for the
//! whole window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Debounces file events by path.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending paths and the last time an event touched them.
    pending: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Record activity on `path`, restarting its window.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// Forget `path` (deleted or renamed away).
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Take every path that has been quiet for the full window.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let window = self.window;
        let mut ready = Vec::new();

        self.pending.retain(|path, last_event| {
            if now.duration_since(*last_event) >= window {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });

        ready.sort();
        ready
    }

    /// Time until the earliest pending path becomes ready, if any is pending.
    pub fn next_ready_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.pending
            .values()
            .map(|last| (*last + self.window).saturating_duration_since(now))
            .min()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
