//! Watcher for a single source directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::config::WatchConfig;

use super::debouncer::Debouncer;
use super::error::WatchError;

/// A file that appeared in a watched directory and has stopped changing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Full path of the file.
    pub path: PathBuf,
    /// Base name, the only part flows match against.
    pub file_name: String,
    /// Modification time when the file was judged stable.
    pub modified: SystemTime,
    /// Size in bytes at that moment.
    pub len: u64,
}

/// Watches one directory (non-recursively) for files that appear.
///
/// `start` hands back the event channel; `stop` releases the OS watch and
/// joins the producer thread, so nothing is sent after it returns.
pub struct DirectoryWatcher {
    path: PathBuf,
    config: WatchConfig,
    running: Option<Running>,
}

struct Running {
    /// Dropping this releases the OS-level watch.
    handle: notify::RecommendedWatcher,
    stop_tx: Sender<()>,
    producer: JoinHandle<()>,
}

impl DirectoryWatcher {
    pub fn new(path: impl Into<PathBuf>, config: WatchConfig) -> Self {
        Self {
            path: path.into(),
            config,
            running: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Begin watching. Fails with [`WatchError::SetupFailed`] when the
    /// directory is missing or the OS watch cannot be registered.
    pub fn start(&mut self) -> Result<Receiver<FileEvent>, WatchError> {
        if self.running.is_some() {
            return Err(WatchError::AlreadyRunning {
                path: self.path.clone(),
            });
        }

        let metadata = fs::metadata(&self.path).map_err(|e| WatchError::setup(&self.path, e))?;
        if !metadata.is_dir() {
            return Err(WatchError::setup(&self.path, "not a directory"));
        }

        let (raw_tx, raw_rx) = unbounded();
        let mut handle = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| WatchError::setup(&self.path, e))?;

        handle
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::setup(&self.path, e))?;

        let mut debouncer = Debouncer::new(self.config.quiescence());
        if self.config.scan_existing {
            queue_existing(&self.path, &mut debouncer);
        }

        let (event_tx, event_rx) = bounded(self.config.channel_capacity.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let producer = Producer {
            dir: self.path.clone(),
            quiescence: self.config.quiescence(),
            poll_interval: self.config.poll_interval(),
            debouncer,
            raw_rx,
            stop_rx,
            event_tx,
        };

        let name = format!("fileflow-watch-{}", self.path.display());
        let producer = thread::Builder::new()
            .name(name)
            .spawn(move || producer.run())
            .map_err(|e| WatchError::setup(&self.path, e))?;

        self.running = Some(Running {
            handle,
            stop_tx,
            producer,
        });

        crate::debug_event!("watcher", "started", "{}", self.path.display());
        Ok(event_rx)
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        drop(running.handle);
        let _ = running.stop_tx.send(());
        if running.producer.join().is_err() {
            tracing::error!("[watcher] producer for {} panicked", self.path.display());
        }

        crate::debug_event!("watcher", "stopped", "{}", self.path.display());
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn queue_existing(dir: &Path, debouncer: &mut Debouncer) {
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.file_type().is_ok_and(|t| t.is_file()) {
                    debouncer.record(entry.path());
                }
            }
        }
        Err(e) => {
            tracing::warn!("[watcher] cannot scan {}: {e}", dir.display());
        }
    }
}

struct Producer {
    dir: PathBuf,
    quiescence: Duration,
    poll_interval: Duration,
    debouncer: Debouncer,
    raw_rx: Receiver<notify::Result<Event>>,
    stop_rx: Receiver<()>,
    event_tx: Sender<FileEvent>,
}

impl Producer {
    fn run(mut self) {
        loop {
            let timeout = self
                .debouncer
                .next_ready_in()
                .map_or(self.poll_interval, |wait| wait.min(self.poll_interval));

            let received = select! {
                recv(self.stop_rx) -> _ => return,
                recv(self.raw_rx) -> msg => Some(msg),
                default(timeout) => None,
            };

            match received {
                Some(Ok(Ok(event))) => self.record(event),
                Some(Ok(Err(e))) => {
                    tracing::warn!("[watcher] {}: watch error: {e}", self.dir.display());
                }
                // Handle dropped: the watch is gone
                Some(Err(_)) => return,
                None => {}
            }

            for path in self.debouncer.take_ready() {
                let Some(event) = self.stable_event(&path) else {
                    continue;
                };
                select! {
                    send(self.event_tx, event) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                    recv(self.stop_rx) -> _ => return,
                }
            }
        }
    }

    fn record(&mut self, event: Event) {
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    self.debouncer.remove(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.debouncer.remove(from);
                    self.debouncer.record(to.clone());
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    self.debouncer.record(path);
                }
            }
            _ => {}
        }
    }

    /// Build an event for `path` if it is still a regular file whose
    /// modification time is outside the quiescence window. Files that were
    /// written without us seeing an event go back into the debouncer.
    fn stable_event(&mut self, path: &Path) -> Option<FileEvent> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let file_name = path.file_name()?.to_str()?.to_string();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(self.quiescence);
        if age < self.quiescence {
            self.debouncer.record(path.to_path_buf());
            return None;
        }

        // Report under the configured directory, whatever form the OS used
        Some(FileEvent {
            path: self.dir.join(&file_name),
            file_name,
            modified,
            len: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fast_config() -> WatchConfig {
        WatchConfig {
            quiescence_ms: 100,
            poll_interval_ms: 20,
            ..WatchConfig::default()
        }
    }

    fn recv_within(rx: &Receiver<FileEvent>, timeout: Duration) -> Option<FileEvent> {
        rx.recv_timeout(timeout).ok()
    }

    #[test]
    fn test_start_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(temp_dir.path().join("absent"), fast_config());
        let err = watcher.start().unwrap_err();
        assert!(matches!(err, WatchError::SetupFailed { .. }));
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_start_on_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let mut watcher = DirectoryWatcher::new(&file, fast_config());
        assert!(matches!(
            watcher.start(),
            Err(WatchError::SetupFailed { .. })
        ));
    }

    #[test]
    fn test_double_start_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(temp_dir.path(), fast_config());
        let _rx = watcher.start().unwrap();
        assert!(matches!(
            watcher.start(),
            Err(WatchError::AlreadyRunning { .. })
        ));
        watcher.stop();
    }

    #[test]
    fn test_new_file_emitted_after_quiescence() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(temp_dir.path(), fast_config());
        let rx = watcher.start().unwrap();

        let started = Instant::now();
        let file = temp_dir.path().join("invoice_001.pdf");
        fs::write(&file, b"pdf").unwrap();

        let event = recv_within(&rx, Duration::from_secs(5)).expect("file event");
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(event.file_name, "invoice_001.pdf");
        assert_eq!(event.len, 3);
        assert!(event.path.ends_with("invoice_001.pdf"));

        watcher.stop();
    }

    #[test]
    fn test_scan_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("already_here.txt"), b"old").unwrap();
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let config = WatchConfig {
            scan_existing: true,
            ..fast_config()
        };
        let mut watcher = DirectoryWatcher::new(temp_dir.path(), config);
        let rx = watcher.start().unwrap();

        let event = recv_within(&rx, Duration::from_secs(5)).expect("existing file event");
        assert_eq!(event.file_name, "already_here.txt");
        // Directories are never emitted
        assert!(recv_within(&rx, Duration::from_millis(300)).is_none());

        watcher.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(temp_dir.path(), fast_config());
        let rx = watcher.start().unwrap();

        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());

        fs::write(temp_dir.path().join("late.txt"), b"late").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        // Producer has exited: channel is drained and disconnected
        assert!(matches!(
            rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_restart_after_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(temp_dir.path(), fast_config());
        let _ = watcher.start().unwrap();
        watcher.stop();

        let rx = watcher.start().unwrap();
        fs::write(temp_dir.path().join("again.txt"), b"1").unwrap();
        assert!(recv_within(&rx, Duration::from_secs(5)).is_some());
        watcher.stop();
    }
}
