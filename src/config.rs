//! Layered engine configuration.
//!
//! Sources, later ones win:
//! - built-in defaults
//! - a TOML file (`<config-dir>/<app-name>/settings.toml` by default)
//! - environment variables
//!
//! # Environment Variables
//!
//! Variables are prefixed with `FILEFLOW_` and use double underscores to
//! separate nested levels:
//! - `FILEFLOW_WATCH__QUIESCENCE_MS=250` sets `watch.quiescence_ms`
//! - `FILEFLOW_MOVER__WORKERS=2` sets `mover.workers`
//! - `FILEFLOW_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "FILEFLOW_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Application name, used for cache and config directories
    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub mover: MoverConfig,

    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `fileflow::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// How long a file must stay unmodified before it is routed
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,

    /// How often pending files are checked for stability
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of each watcher's event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Route files already present when a watcher starts
    #[serde(default)]
    pub scan_existing: bool,

    /// Watch setup attempts after the first failure
    #[serde(default = "default_setup_retries")]
    pub setup_retries: u32,

    /// Initial retry delay, doubled after each failed attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MoverConfig {
    /// Concurrent move workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending move jobs before submitters block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Highest `name (N).ext` suffix tried before giving up
    #[serde(default = "default_max_collision_suffix")]
    pub max_collision_suffix: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RoutingConfig {
    /// Maximum watched directories one file may be routed through
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Remembered (path, mtime) pairs for duplicate suppression
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_version() -> u32 {
    1
}
fn default_app_name() -> String {
    "FileFlow".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_quiescence_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_channel_capacity() -> usize {
    256
}
fn default_setup_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_collision_suffix() -> u32 {
    9999
}
fn default_max_hops() -> usize {
    4
}
fn default_dedup_capacity() -> usize {
    4096
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            app_name: default_app_name(),
            logging: LoggingConfig::default(),
            watch: WatchConfig::default(),
            mover: MoverConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: default_quiescence_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
            scan_existing: false,
            setup_retries: default_setup_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_collision_suffix: default_max_collision_suffix(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl WatchConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Settings {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        match Self::config_path(&default_app_name()) {
            Some(path) => Self::load_from(path),
            None => Self::figment(None).extract().map_err(Box::new),
        }
    }

    /// Load configuration from a specific file plus environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(Some(path.as_ref()))
            .extract()
            .map_err(Box::new)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(
            Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
        )
    }

    /// `<config-dir>/<app-name>/settings.toml`
    pub fn config_path(app_name: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_name).join("settings.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.app_name, "FileFlow");
        assert_eq!(settings.watch.quiescence_ms, 1000);
        assert!(settings.mover.workers >= 1 && settings.mover.workers <= 4);
        assert_eq!(settings.mover.max_collision_suffix, 9999);
        assert!(!settings.watch.scan_existing);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
app_name = "FileFlowTest"

[watch]
quiescence_ms = 250
scan_existing = true

[mover]
workers = 2

[logging.modules]
"fileflow::watcher" = "debug"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.app_name, "FileFlowTest");
        assert_eq!(settings.watch.quiescence_ms, 250);
        assert!(settings.watch.scan_existing);
        assert_eq!(settings.mover.workers, 2);
        assert_eq!(settings.logging.modules["fileflow::watcher"], "debug");
        // Untouched values keep their defaults
        assert_eq!(settings.watch.poll_interval_ms, 100);
        assert_eq!(settings.routing.max_hops, 4);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch, WatchConfig::default());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.quiescence_ms = 42;
        settings.mover.queue_capacity = 8;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.watch.quiescence_ms, 42);
        assert_eq!(loaded.mover.queue_capacity, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[routing]\nmax_hops = 2\ndedup_capacity = 10\n").unwrap();

        unsafe {
            std::env::set_var("FILEFLOW_ROUTING__DEDUP_CAPACITY", "77");
        }

        let settings = Settings::load_from(&config_path).unwrap();

        unsafe {
            std::env::remove_var("FILEFLOW_ROUTING__DEDUP_CAPACITY");
        }

        // Environment wins over the file; other file values still apply
        assert_eq!(settings.routing.dedup_capacity, 77);
        assert_eq!(settings.routing.max_hops, 2);
    }
}
