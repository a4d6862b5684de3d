use std::fs;
use std::sync::Arc;

use fileflow::flows::DIRECTORIES_KEY;
use fileflow::{
    ActionLog, FilePreferences, FileFlow, FlowStore, MemoryPreferences, Preferences, Settings,
    StoreError, WatchState,
};
use tempfile::TempDir;

#[test]
fn test_configuration_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = temp_dir.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let prefs_path = temp_dir.path().join("config").join("preferences.json");

    {
        let preferences = Arc::new(FilePreferences::open(&prefs_path));
        let engine = FileFlow::new(
            &Settings::default(),
            preferences,
            Arc::new(ActionLog::in_memory()),
        );
        engine.add_directory(&inbox).unwrap();
        engine.add_flow(&inbox, r"\.pdf$", temp_dir.path().join("pdf")).unwrap();
        engine.add_flow(&inbox, r"\.png$", temp_dir.path().join("img")).unwrap();
        engine.set_start_on_login(true).unwrap();
        engine.shutdown();
    }

    let preferences = Arc::new(FilePreferences::open(&prefs_path));
    let engine = FileFlow::new(
        &Settings::default(),
        preferences,
        Arc::new(ActionLog::in_memory()),
    );

    let listing = engine.directories();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, inbox);
    assert_eq!(listing[0].flow_count, 2);
    assert_eq!(listing[0].state, WatchState::Watching);

    let flows = engine.flows(&inbox).unwrap();
    assert_eq!(flows[0].pattern().as_str(), r"\.pdf$");
    assert_eq!(flows[1].destination(), temp_dir.path().join("img"));
    assert!(engine.start_on_login());
    engine.shutdown();
}

#[test]
fn test_snapshot_round_trip_between_stores() {
    let source = FlowStore::new();
    source.add_directory("/data/inbox").unwrap();
    source.add_directory("/data/empty").unwrap();
    source.add_flow("/data/inbox", "^invoice_", "/data/invoices").unwrap();
    source.add_flow("/data/inbox", r"\.csv$", "/data/csv").unwrap();

    let target = FlowStore::new();
    target.restore(&source.snapshot().unwrap()).unwrap();

    assert_eq!(target.directory_paths(), source.directory_paths());
    assert_eq!(
        target.flows("/data/inbox").unwrap(),
        source.flows("/data/inbox").unwrap()
    );
    assert!(target.flows("/data/empty").unwrap().is_empty());
}

#[test]
fn test_legacy_layout_restores() {
    let legacy = br#"[
        {"Path": "/home/me/Downloads", "Flows": [
            {"Pattern": "\\.dmg$", "Destination": {"Path": "/home/me/Installers"}}
        ]},
        {"Path": "/home/me/Desktop", "Flows": null}
    ]"#;

    let store = FlowStore::new();
    store.restore(legacy).unwrap();

    let flows = store.flows("/home/me/Downloads").unwrap();
    assert_eq!(flows.len(), 1);
    assert!(flows[0].matches("installer.dmg"));
    assert_eq!(
        flows[0].destination(),
        std::path::Path::new("/home/me/Installers")
    );
    assert!(store.flows("/home/me/Desktop").unwrap().is_empty());
}

#[test]
fn test_invalid_pattern_in_snapshot_is_corruption() {
    let preferences = Arc::new(MemoryPreferences::new());
    let store = FlowStore::with_preferences(preferences.clone());
    store.add_directory("/in").unwrap();
    let saved = preferences.get_string(DIRECTORIES_KEY).unwrap();

    let bad = br#"[{"path": "/in", "flows": [{"pattern": "(", "destination": "/out"}]}]"#;
    let err = store.restore(bad).unwrap_err();
    assert!(matches!(err, StoreError::CorruptState { .. }));
    assert!(store.is_empty());
    // A failed restore is not written back
    assert_eq!(preferences.get_string(DIRECTORIES_KEY).unwrap(), saved);
}
