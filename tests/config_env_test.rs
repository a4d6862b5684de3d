use fileflow::Settings;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_env_overrides_file_and_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    fs::write(
        &config_path,
        "[watch]\nquiescence_ms = 250\nscan_existing = true\n\n[mover]\nworkers = 2\n",
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("FILEFLOW_MOVER__WORKERS", "3");
        env::set_var("FILEFLOW_WATCH__SETUP_RETRIES", "7");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("FILEFLOW_MOVER__WORKERS");
        env::remove_var("FILEFLOW_WATCH__SETUP_RETRIES");
    }

    // From the file
    assert_eq!(settings.watch.quiescence_ms, 250);
    assert!(settings.watch.scan_existing);
    // Environment wins over the file
    assert_eq!(settings.mover.workers, 3);
    assert_eq!(settings.watch.setup_retries, 7);
    // Untouched values keep their defaults
    assert_eq!(settings.routing.max_hops, 4);
    assert_eq!(settings.app_name, "FileFlow");
}
