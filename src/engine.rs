//! Host-facing facade over the store, the coordinator and the action log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::action_log::ActionLog;
use crate::config::Settings;
use crate::flows::{Flow, FlowStore, StoreResult};
use crate::log_event;
use crate::preferences::{PreferenceError, Preferences};
use crate::routing::{RoutingCoordinator, RoutingEvent, WatchState};

/// Boolean preference the host reads to decide on login registration.
pub const START_ON_LOGIN_KEY: &str = "start_on_login";

/// One row of the directory listing a host shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub path: PathBuf,
    pub flow_count: usize,
    pub state: WatchState,
}

impl DirectoryStatus {
    /// Directories with flows cannot be removed.
    pub fn removable(&self) -> bool {
        self.flow_count == 0
    }
}

/// The running engine.
///
/// Every successful configuration change is persisted by the store and then
/// applied to the watchers before the call returns.
pub struct FileFlow {
    store: Arc<FlowStore>,
    coordinator: RoutingCoordinator,
    preferences: Arc<dyn Preferences>,
    action_log: Arc<ActionLog>,
}

impl FileFlow {
    /// Restore the saved configuration and start watching it.
    ///
    /// A corrupt saved configuration is logged and the engine starts with no
    /// directories.
    pub fn new(settings: &Settings, preferences: Arc<dyn Preferences>, action_log: Arc<ActionLog>) -> Self {
        let store = Arc::new(FlowStore::with_preferences(preferences.clone()));
        if let Err(e) = store.load_persisted() {
            tracing::error!("[engine] {e}; starting with no directories");
            action_log.write(format!("Could not restore saved flows, starting empty: {e}"));
        }

        let coordinator = RoutingCoordinator::new(store.clone(), settings, action_log.clone());
        coordinator.reconcile();
        log_event!("engine", "started", "{} directories", store.len());

        Self {
            store,
            coordinator,
            preferences,
            action_log,
        }
    }

    pub fn add_directory(&self, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let path = self.store.add_directory(path)?;
        self.coordinator.reconcile();
        Ok(path)
    }

    pub fn remove_directory(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        self.store.remove_directory(path)?;
        self.coordinator.reconcile();
        Ok(())
    }

    /// Append a flow; returns its index within the directory.
    pub fn add_flow(
        &self,
        directory: impl AsRef<Path>,
        pattern: &str,
        destination: impl AsRef<Path>,
    ) -> StoreResult<usize> {
        let index = self.store.add_flow(directory, pattern, destination)?;
        self.coordinator.reconcile();
        Ok(index)
    }

    pub fn remove_flow(&self, directory: impl AsRef<Path>, index: usize) -> StoreResult<Flow> {
        let flow = self.store.remove_flow(directory, index)?;
        self.coordinator.reconcile();
        Ok(flow)
    }

    pub fn snapshot(&self) -> StoreResult<Vec<u8>> {
        self.store.snapshot()
    }

    /// Replace the whole configuration. On failure the store is left empty,
    /// and the watchers follow it either way.
    pub fn restore(&self, bytes: &[u8]) -> StoreResult<()> {
        let result = self.store.restore(bytes);
        self.coordinator.reconcile();
        result
    }

    pub fn flows(&self, directory: impl AsRef<Path>) -> StoreResult<Vec<Flow>> {
        self.store.flows(directory)
    }

    pub fn directories(&self) -> Vec<DirectoryStatus> {
        let states = self.coordinator.states();
        self.store
            .directories()
            .into_iter()
            .map(|summary| {
                let state = states
                    .iter()
                    .find(|(path, _)| *path == summary.path)
                    .map_or(WatchState::Stopped, |(_, state)| *state);
                DirectoryStatus {
                    path: summary.path,
                    flow_count: summary.flow_count,
                    state,
                }
            })
            .collect()
    }

    pub fn watch_state(&self, path: impl AsRef<Path>) -> WatchState {
        self.coordinator.watch_state(path)
    }

    pub fn reconcile(&self) {
        self.coordinator.reconcile();
    }

    pub fn subscribe(&self) -> Receiver<RoutingEvent> {
        self.coordinator.subscribe()
    }

    /// Move jobs queued or running.
    pub fn pending_moves(&self) -> usize {
        self.coordinator.pending_moves()
    }

    pub fn action_log(&self) -> &Arc<ActionLog> {
        &self.action_log
    }

    pub fn start_on_login(&self) -> bool {
        self.preferences.get_bool(START_ON_LOGIN_KEY).unwrap_or(false)
    }

    pub fn set_start_on_login(&self, enabled: bool) -> Result<(), PreferenceError> {
        self.preferences.set_bool(START_ON_LOGIN_KEY, enabled)?;
        log_event!("engine", "start on login", "{enabled}");
        Ok(())
    }

    /// Stop watching, finish queued moves, flush the action log.
    pub fn shutdown(self) {
        self.coordinator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{DIRECTORIES_KEY, StoreError};
    use crate::preferences::MemoryPreferences;
    use tempfile::TempDir;

    fn engine(preferences: Arc<dyn Preferences>) -> FileFlow {
        FileFlow::new(&Settings::default(), preferences, Arc::new(ActionLog::in_memory()))
    }

    #[test]
    fn test_corrupt_preferences_start_empty() {
        let preferences = Arc::new(MemoryPreferences::new());
        preferences.set_string(DIRECTORIES_KEY, "{not json").unwrap();

        let engine = engine(preferences.clone());
        assert!(engine.directories().is_empty());
        assert!(
            engine
                .action_log()
                .recent()
                .iter()
                .any(|line| line.contains("Could not restore saved flows"))
        );
        // The unreadable value is left for the user to recover
        assert_eq!(
            preferences.get_string(DIRECTORIES_KEY).as_deref(),
            Some("{not json")
        );
        engine.shutdown();
    }

    #[test]
    fn test_mutations_update_watch_state() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(MemoryPreferences::new()));

        let path = engine.add_directory(temp_dir.path()).unwrap();
        assert_eq!(engine.watch_state(&path), WatchState::Watching);

        let listing = engine.directories();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].state, WatchState::Watching);
        assert!(listing[0].removable());

        engine.add_flow(&path, r"\.txt$", temp_dir.path().join("out")).unwrap();
        assert!(!engine.directories()[0].removable());
        assert!(matches!(
            engine.remove_directory(&path),
            Err(StoreError::DirectoryInUse { .. })
        ));

        engine.remove_flow(&path, 0).unwrap();
        engine.remove_directory(&path).unwrap();
        assert_eq!(engine.watch_state(&path), WatchState::Stopped);
        engine.shutdown();
    }

    #[test]
    fn test_start_on_login_preference() {
        let preferences = Arc::new(MemoryPreferences::new());
        let engine = engine(preferences.clone());
        assert!(!engine.start_on_login());

        engine.set_start_on_login(true).unwrap();
        assert!(engine.start_on_login());
        assert_eq!(preferences.get_bool(START_ON_LOGIN_KEY), Some(true));
        engine.shutdown();
    }

    #[test]
    fn test_failed_restore_stops_watchers() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(MemoryPreferences::new()));
        let path = engine.add_directory(temp_dir.path()).unwrap();

        let result = engine.restore(b"[{\"path\": \"\", \"flows\": []}]");
        assert!(matches!(result, Err(StoreError::CorruptState { .. })));
        assert!(engine.directories().is_empty());
        assert_eq!(engine.watch_state(&path), WatchState::Stopped);
        engine.shutdown();
    }
}
