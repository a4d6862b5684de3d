//! Key/value preference storage supplied by the host.
//!
//! The engine persists its flow configuration under a single key and reads
//! a few boolean switches. Hosts with their own preference system implement
//! [`Preferences`]; [`FilePreferences`] and [`MemoryPreferences`] cover the
//! common cases.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Failed to write preferences to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize preferences: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Host preference interface.
pub trait Preferences: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError>;

    fn get_bool(&self, key: &str) -> Option<bool>;

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError>;
}

/// In-process preferences, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<Map<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().get(key)?.as_str().map(str::to_string)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values
            .write()
            .insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.read().get(key)?.as_bool()
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.values.write().insert(key.to_string(), Value::Bool(value));
        Ok(())
    }
}

/// Preferences backed by one JSON object file.
///
/// Every write replaces the whole file through a temp file in the same
/// directory followed by a rename, so a crash leaves either the old or the
/// new contents.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl FilePreferences {
    /// Open (or lazily create) the preference file at `path`.
    ///
    /// A missing file starts empty. An unreadable or malformed file also
    /// starts empty and is overwritten by the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("[prefs] ignoring malformed {}: {e}", path.display());
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                tracing::warn!("[prefs] cannot read {}: {e}", path.display());
                Map::new()
            }
        };

        Self {
            path,
            values: RwLock::new(values),
        }
    }

    /// Default location: `<config-dir>/<app-name>/preferences.json`.
    pub fn default_path(app_name: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_name).join("preferences.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_locked(&self, values: &Map<String, Value>) -> Result<(), PreferenceError> {
        let io_err = |source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_err)?;

        let bytes = serde_json::to_vec_pretty(values)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.write_locked(&values)
    }
}

impl Preferences for FilePreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().get(key)?.as_str().map(str::to_string)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.set_value(key, Value::String(value.to_string()))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.read().get(key)?.as_bool()
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.set_value(key, Value::Bool(value))
    }
}
