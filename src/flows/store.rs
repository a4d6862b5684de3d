//! The flow configuration store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::preferences::Preferences;

use super::error::{StoreError, StoreResult};
use super::pattern::Pattern;
use super::snapshot::{DirectoryRecord, FlowRecord, StoreSnapshot};

/// Preference key the store persists under.
pub const DIRECTORIES_KEY: &str = "directories";

/// A routing rule: files whose name matches `pattern` move to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pattern: Pattern,
    destination: PathBuf,
}

impl Flow {
    /// Build a validated flow.
    pub fn new(pattern: &str, destination: impl AsRef<Path>) -> StoreResult<Self> {
        let pattern = Pattern::compile(pattern)?;
        let destination = resolve_destination(destination.as_ref())?;
        Ok(Self {
            pattern,
            destination,
        })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.test(file_name)
    }

    fn to_record(&self) -> FlowRecord {
        FlowRecord {
            pattern: self.pattern.as_str().to_string(),
            destination: self.destination.clone(),
        }
    }
}

/// Read-only view of one configured directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySummary {
    pub path: PathBuf,
    pub flow_count: usize,
}

impl DirectorySummary {
    /// Directories with flows cannot be removed.
    pub fn removable(&self) -> bool {
        self.flow_count == 0
    }
}

type Directories = IndexMap<PathBuf, Vec<Flow>>;

struct Persistence {
    preferences: Arc<dyn Preferences>,
    key: String,
}

/// Configured directories and their ordered flows.
///
/// All mutations go through one lock. When bound to [`Preferences`], every
/// successful mutation rewrites the full snapshot before the lock is
/// released.
pub struct FlowStore {
    directories: Mutex<Directories>,
    persistence: Option<Persistence>,
}

impl FlowStore {
    /// An empty, unpersisted store.
    pub fn new() -> Self {
        Self {
            directories: Mutex::new(IndexMap::new()),
            persistence: None,
        }
    }

    /// An empty store that persists under [`DIRECTORIES_KEY`].
    pub fn with_preferences(preferences: Arc<dyn Preferences>) -> Self {
        Self::with_preferences_key(preferences, DIRECTORIES_KEY)
    }

    pub fn with_preferences_key(preferences: Arc<dyn Preferences>, key: impl Into<String>) -> Self {
        Self {
            directories: Mutex::new(IndexMap::new()),
            persistence: Some(Persistence {
                preferences,
                key: key.into(),
            }),
        }
    }

    /// Load the persisted snapshot, if any.
    ///
    /// A corrupt snapshot leaves the store empty and returns
    /// [`StoreError::CorruptState`]; the persisted value is kept untouched
    /// until the next successful mutation.
    pub fn load_persisted(&self) -> StoreResult<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let data = persistence
            .preferences
            .get_string(&persistence.key)
            .unwrap_or_default();

        let mut directories = self.directories.lock();
        match decode(data.as_bytes()) {
            Ok(restored) => {
                *directories = restored;
                crate::debug_event!("store", "loaded", "{} directories", directories.len());
                Ok(())
            }
            Err(e) => {
                directories.clear();
                Err(e)
            }
        }
    }

    /// Start watching a new directory with no flows.
    ///
    /// Returns the normalized path the directory is stored under.
    pub fn add_directory(&self, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let path = resolve_directory(path.as_ref())?;

        let mut directories = self.directories.lock();
        if directories.contains_key(&path) {
            return Err(StoreError::DuplicatePath { path });
        }
        directories.insert(path.clone(), Vec::new());
        self.persist(&directories);

        crate::log_event!("store", "directory added", "{}", path.display());
        Ok(path)
    }

    /// Remove a directory. Fails while it still has flows.
    pub fn remove_directory(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = lookup_key(path.as_ref());

        let mut directories = self.directories.lock();
        let flows = directories
            .get(&path)
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?
            .len();
        if flows > 0 {
            return Err(StoreError::DirectoryInUse { path, flows });
        }
        directories.shift_remove(&path);
        self.persist(&directories);

        crate::log_event!("store", "directory removed", "{}", path.display());
        Ok(())
    }

    /// Append a flow to a directory. Returns the new flow's index.
    pub fn add_flow(
        &self,
        directory: impl AsRef<Path>,
        pattern: &str,
        destination: impl AsRef<Path>,
    ) -> StoreResult<usize> {
        let path = lookup_key(directory.as_ref());

        let mut directories = self.directories.lock();
        let flows = directories
            .get_mut(&path)
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;
        let flow = Flow::new(pattern, destination)?;

        crate::log_event!(
            "store",
            "flow added",
            "{}: '{}' -> {}",
            path.display(),
            flow.pattern().as_str(),
            flow.destination().display()
        );
        flows.push(flow);
        let index = flows.len() - 1;
        self.persist(&directories);
        Ok(index)
    }

    /// Remove the flow at `index`; later flows shift down by one.
    pub fn remove_flow(&self, directory: impl AsRef<Path>, index: usize) -> StoreResult<Flow> {
        let path = lookup_key(directory.as_ref());

        let mut directories = self.directories.lock();
        let flows = directories
            .get_mut(&path)
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;
        if index >= flows.len() {
            return Err(StoreError::FlowNotFound {
                path,
                index,
                len: flows.len(),
            });
        }
        let removed = flows.remove(index);
        self.persist(&directories);

        crate::log_event!(
            "store",
            "flow removed",
            "{}: '{}'",
            path.display(),
            removed.pattern().as_str()
        );
        Ok(removed)
    }

    /// Serialize the whole store.
    pub fn snapshot(&self) -> StoreResult<Vec<u8>> {
        encode(&self.directories.lock()).to_bytes()
    }

    /// Replace the whole store from `bytes`.
    ///
    /// On failure the store is left empty and [`StoreError::CorruptState`]
    /// is returned. Empty input restores an empty store.
    pub fn restore(&self, bytes: &[u8]) -> StoreResult<()> {
        let mut directories = self.directories.lock();
        match decode(bytes) {
            Ok(restored) => {
                *directories = restored;
                self.persist(&directories);
                crate::log_event!("store", "restored", "{} directories", directories.len());
                Ok(())
            }
            Err(e) => {
                directories.clear();
                tracing::warn!("[store] restore failed, store reset: {e}");
                Err(e)
            }
        }
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.directories
            .lock()
            .contains_key(&lookup_key(path.as_ref()))
    }

    /// Configured directory paths in insertion order.
    pub fn directory_paths(&self) -> Vec<PathBuf> {
        self.directories.lock().keys().cloned().collect()
    }

    pub fn directories(&self) -> Vec<DirectorySummary> {
        self.directories
            .lock()
            .iter()
            .map(|(path, flows)| DirectorySummary {
                path: path.clone(),
                flow_count: flows.len(),
            })
            .collect()
    }

    /// The flows of one directory in evaluation order.
    pub fn flows(&self, directory: impl AsRef<Path>) -> StoreResult<Vec<Flow>> {
        let path = lookup_key(directory.as_ref());
        self.directories
            .lock()
            .get(&path)
            .cloned()
            .ok_or(StoreError::NotFound { path })
    }

    pub fn len(&self) -> usize {
        self.directories.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.lock().is_empty()
    }

    fn persist(&self, directories: &Directories) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        // Never overwrite the saved configuration with a partial encoding
        let bytes = match encode(directories).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("[store] configuration not persisted: {e}");
                return;
            }
        };
        let data = String::from_utf8_lossy(&bytes);
        if let Err(e) = persistence.preferences.set_string(&persistence.key, &data) {
            tracing::error!("[store] failed to persist configuration: {e}");
        }
    }
}

impl Default for FlowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(directories: &Directories) -> StoreSnapshot {
    StoreSnapshot::new(
        directories
            .iter()
            .map(|(path, flows)| DirectoryRecord {
                path: path.clone(),
                flows: flows.iter().map(Flow::to_record).collect(),
            })
            .collect(),
    )
}

/// Decode and validate a snapshot. Any invariant violation is corruption.
fn decode(bytes: &[u8]) -> StoreResult<Directories> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(IndexMap::new());
    }

    let snapshot = StoreSnapshot::from_bytes(bytes)?;
    let mut directories = IndexMap::with_capacity(snapshot.directories.len());

    for record in snapshot.directories {
        let path = resolve_directory(&record.path).map_err(into_corrupt)?;
        let flows = record
            .flows
            .iter()
            .map(|flow| Flow::new(&flow.pattern, &flow.destination))
            .collect::<StoreResult<Vec<_>>>()
            .map_err(into_corrupt)?;

        if directories.insert(path.clone(), flows).is_some() {
            return Err(StoreError::CorruptState {
                reason: format!("duplicate directory {}", path.display()),
            });
        }
    }

    Ok(directories)
}

fn into_corrupt(e: StoreError) -> StoreError {
    StoreError::CorruptState {
        reason: e.to_string(),
    }
}

fn resolve_directory(path: &Path) -> StoreResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::InvalidPath {
            path: String::new(),
            reason: "path is empty".to_string(),
        });
    }
    if path.to_str().is_none() {
        return Err(StoreError::InvalidPath {
            path: path.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        });
    }
    std::path::absolute(path).map_err(|e| StoreError::InvalidPath {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn resolve_destination(path: &Path) -> StoreResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::InvalidDestination {
            destination: String::new(),
            reason: "destination is empty".to_string(),
        });
    }
    if path.to_str().is_none() {
        return Err(StoreError::InvalidDestination {
            destination: path.display().to_string(),
            reason: "destination is not valid UTF-8".to_string(),
        });
    }
    std::path::absolute(path).map_err(|e| StoreError::InvalidDestination {
        destination: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Lookups use the same normalization as inserts, falling back to the raw path.
pub(crate) fn lookup_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
