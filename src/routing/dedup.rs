//! Duplicate suppression and placement tracking for file appearances.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Remembers the modification stamp each path was last routed with.
///
/// Oldest entries are evicted first once `capacity` is reached.
#[derive(Debug)]
pub(crate) struct SeenFiles {
    stamps: HashMap<PathBuf, SystemTime>,
    order: VecDeque<PathBuf>,
    capacity: usize,
}

impl SeenFiles {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            stamps: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if this exact (path, stamp) pair was already seen.
    pub(crate) fn insert(&mut self, path: &Path, modified: SystemTime) -> bool {
        match self.stamps.get_mut(path) {
            Some(stamp) if *stamp == modified => return false,
            Some(stamp) => {
                *stamp = modified;
                return true;
            }
            None => {}
        }

        while self.stamps.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.stamps.remove(&oldest);
        }
        self.stamps.insert(path.to_path_buf(), modified);
        self.order.push_back(path.to_path_buf());
        true
    }

    /// Forget a path once its file has left, so a later arrival counts again.
    pub(crate) fn forget(&mut self, path: &Path) {
        if self.stamps.remove(path).is_some() {
            self.order.retain(|p| p != path);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }
}

/// Files the engine moved into a watched directory, with the watched
/// directories each was routed out of.
///
/// Once `capacity` is reached, entries whose file no longer exists are
/// dropped first, then the oldest.
#[derive(Debug)]
pub(crate) struct PlacedFiles {
    routes: HashMap<PathBuf, Vec<PathBuf>>,
    order: VecDeque<PathBuf>,
    capacity: usize,
}

impl PlacedFiles {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            routes: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn insert(&mut self, path: PathBuf, route: Vec<PathBuf>) {
        if let Some(existing) = self.routes.get_mut(&path) {
            *existing = route;
            return;
        }

        if self.routes.len() >= self.capacity {
            self.retain(|placed| placed.exists());
        }
        while self.routes.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.routes.remove(&oldest);
        }
        self.order.push_back(path.clone());
        self.routes.insert(path, route);
    }

    /// Remove and return the route recorded for `path`.
    pub(crate) fn take(&mut self, path: &Path) -> Option<Vec<PathBuf>> {
        let route = self.routes.remove(path)?;
        self.order.retain(|p| p != path);
        Some(route)
    }

    /// Drop every entry placed directly inside `directory`.
    pub(crate) fn forget_directory(&mut self, directory: &Path) {
        self.retain(|placed| placed.parent() != Some(directory));
    }

    fn retain(&mut self, keep: impl Fn(&Path) -> bool) {
        self.routes.retain(|path, _| keep(path));
        let routes = &self.routes;
        self.order.retain(|path| routes.contains_key(path));
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}
