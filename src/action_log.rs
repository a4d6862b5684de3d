//! Human-readable, append-only record of what the engine did.
//!
//! Every line is `YYYY/MM/DD HH:MM:SS message` in local time. Lines go to
//! `<cache dir>/<app name>/application.log`, to a bounded in-memory tail for
//! the host UI, to live subscribers, and to `tracing` under the `action`
//! target.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use thiserror::Error;

use crate::routing::RoutingEvent;

pub const LOG_FILE_NAME: &str = "application.log";

/// Lines kept for [`ActionLog::recent`].
pub const RECENT_CAPACITY: usize = 500;

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum ActionLogError {
    #[error("No cache directory is available on this platform")]
    NoCacheDir,

    #[error("Cannot open action log '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct ActionLog {
    path: Option<PathBuf>,
    file: Option<Mutex<LineWriter<File>>>,
    recent: Mutex<VecDeque<String>>,
    subscribers: Mutex<Vec<Sender<String>>>,
}

impl ActionLog {
    /// Open the per-user log for `app_name`, creating directories as needed.
    pub fn open(app_name: &str) -> Result<Self, ActionLogError> {
        let path = Self::default_path(app_name).ok_or(ActionLogError::NoCacheDir)?;
        Self::open_at(path)
    }

    /// Open (append) a log file at an explicit location.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, ActionLogError> {
        let path = path.into();
        let open_err = |source| ActionLogError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self {
            file: Some(Mutex::new(LineWriter::new(file))),
            path: Some(path),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// A log that keeps only the in-memory tail. Used by tests and hosts
    /// without a writable cache directory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn default_path(app_name: &str) -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(app_name).join(LOG_FILE_NAME))
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one timestamped line.
    pub fn write(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let line = format!(
            "{} {message}",
            chrono::Local::now().format(TIMESTAMP_FORMAT)
        );
        tracing::info!(target: "action", "{message}");
        self.append(line);
    }

    /// Append the line for a routing event.
    pub fn record(&self, event: &RoutingEvent) {
        let message = event.to_string();
        if event.is_failure() {
            tracing::warn!(target: "action", "{message}");
        } else {
            tracing::info!(target: "action", "{message}");
        }
        let line = format!(
            "{} {message}",
            chrono::Local::now().format(TIMESTAMP_FORMAT)
        );
        self.append(line);
    }

    fn append(&self, line: String) {
        if let Some(file) = &self.file {
            let mut file = file.lock();
            if let Err(e) = writeln!(file, "{line}") {
                tracing::error!("[action_log] write failed: {e}");
            }
        }

        {
            let mut recent = self.recent.lock();
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(line.clone());
        }

        self.subscribers
            .lock()
            .retain(|tx| tx.send(line.clone()).is_ok());
    }

    /// The most recent lines, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Live feed of lines written after this call.
    pub fn subscribe(&self) -> Receiver<String> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn flush(&self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.lock().flush() {
                tracing::error!("[action_log] flush failed: {e}");
            }
        }
    }
}

impl Drop for ActionLog {
    fn drop(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog")
            .field("path", &self.path)
            .field("recent", &self.recent.lock().len())
            .finish()
    }
}
