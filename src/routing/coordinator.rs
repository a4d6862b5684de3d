//! Keeps exactly one watcher per configured directory and routes what the
//! watchers report.
//!
//! Thread layout:
//!
//! ```text
//! DirectoryWatcher (producer) ─FileEvent─> evaluator thread ─MoveJob─> MovePool
//!        one per directory                 one per directory            shared
//! ```
//!
//! Setup failures are retried on short-lived retry threads that hold only a
//! weak reference to the coordinator.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::action_log::ActionLog;
use crate::config::{Settings, WatchConfig};
use crate::flows::{FlowStore, lookup_key};
use crate::mover::{MoveError, MoveJob, MoveOutcome, MovePool, MoveStrategy, Mover};
use crate::watcher::{DirectoryWatcher, FileEvent};
use crate::{debug_event, log_event};

use super::dedup::{PlacedFiles, SeenFiles};
use super::events::RoutingEvent;

/// Live watch state of one configured directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Watching,
    /// Setup failed `attempt` times; another attempt is scheduled.
    Retrying { attempt: u32 },
    /// Setup retries exhausted. Remove and re-add the directory to try again.
    Degraded,
}

/// Carried with each move job so completion can be attributed and placed
/// files can be tracked.
#[derive(Debug, Clone)]
pub(crate) struct RouteContext {
    directory: PathBuf,
    /// Watched directories this file was routed out of, oldest first.
    route: Vec<PathBuf>,
}

pub struct RoutingCoordinator {
    shared: Arc<Shared>,
}

impl RoutingCoordinator {
    /// Build a coordinator over `store`. Nothing is watched until
    /// [`reconcile`](Self::reconcile) runs.
    pub fn new(store: Arc<FlowStore>, settings: &Settings, log: Arc<ActionLog>) -> Self {
        let hub = Arc::new(Hub {
            store,
            log,
            subscribers: Mutex::new(Vec::new()),
            placed: Mutex::new(PlacedFiles::new(settings.routing.dedup_capacity)),
            seen: Mutex::new(SeenFiles::new(settings.routing.dedup_capacity)),
        });

        let completion = hub.clone();
        let pool = MovePool::start(
            Mover::new(&settings.mover),
            settings.mover.workers,
            settings.mover.queue_capacity,
            move |job: &MoveJob<RouteContext>, result| completion.move_finished(job, result),
        );

        Self {
            shared: Arc::new(Shared {
                hub,
                pool: Arc::new(pool),
                watch: settings.watch.clone(),
                max_hops: settings.routing.max_hops,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Bring running watchers in line with the store's directories.
    pub fn reconcile(&self) {
        self.shared.reconcile();
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<RoutingEvent> {
        let (tx, rx) = unbounded();
        self.shared.hub.subscribers.lock().push(tx);
        rx
    }

    pub fn watch_state(&self, directory: impl AsRef<Path>) -> WatchState {
        let key = lookup_key(directory.as_ref());
        self.shared
            .slots
            .lock()
            .get(&key)
            .map_or(WatchState::Stopped, |slot| slot.state)
    }

    /// Watch state of every configured directory, in store order.
    pub fn states(&self) -> Vec<(PathBuf, WatchState)> {
        let paths = self.shared.hub.store.directory_paths();
        let slots = self.shared.slots.lock();
        paths
            .into_iter()
            .map(|path| {
                let state = slots.get(&path).map_or(WatchState::Stopped, |slot| slot.state);
                (path, state)
            })
            .collect()
    }

    /// Move jobs queued or running.
    pub fn pending_moves(&self) -> usize {
        self.shared.pool.pending()
    }

    /// Stop every watcher, let queued moves finish, then flush the log.
    /// Later calls do nothing.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for RoutingCoordinator {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// State shared with the move workers' completion callback.
struct Hub {
    store: Arc<FlowStore>,
    log: Arc<ActionLog>,
    subscribers: Mutex<Vec<Sender<RoutingEvent>>>,
    /// Files the engine moved into a watched directory, with their route.
    placed: Mutex<PlacedFiles>,
    seen: Mutex<SeenFiles>,
}

impl Hub {
    fn publish(&self, event: RoutingEvent) {
        self.log.record(&event);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn move_finished(&self, job: &MoveJob<RouteContext>, result: &Result<MoveOutcome, MoveError>) {
        let directory = job.context.directory.clone();
        match result {
            Ok(outcome) => {
                if outcome.strategy != MoveStrategy::InPlace {
                    self.seen.lock().forget(&job.source);
                    if self.store.contains(&job.destination_dir) {
                        self.placed
                            .lock()
                            .insert(outcome.destination.clone(), job.context.route.clone());
                    }
                }
                self.publish(RoutingEvent::MoveSucceeded {
                    directory,
                    source: outcome.source.clone(),
                    destination: outcome.destination.clone(),
                    strategy: outcome.strategy,
                });
            }
            Err(e) => {
                tracing::error!("[routing] move failed: {e}");
                self.publish(RoutingEvent::MoveFailed {
                    directory,
                    source: job.source.clone(),
                    destination_dir: job.destination_dir.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

struct Slot {
    /// Distinguishes this slot from an earlier one for the same path.
    generation: u64,
    state: WatchState,
    watcher: Option<DirectoryWatcher>,
    evaluator: Option<JoinHandle<()>>,
}

struct Shared {
    hub: Arc<Hub>,
    pool: Arc<MovePool<RouteContext>>,
    watch: WatchConfig,
    max_hops: usize,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn reconcile(self: &Arc<Self>) {
        // Read the configuration under the slots lock so concurrent
        // reconciles apply in the order they read it.
        let mut slots = self.slots.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let configured = self.hub.store.directory_paths();

        let wanted: HashSet<&PathBuf> = configured.iter().collect();
        let removed: Vec<PathBuf> = slots
            .keys()
            .filter(|path| !wanted.contains(path))
            .cloned()
            .collect();
        for directory in removed {
            if let Some(slot) = slots.remove(&directory) {
                self.stop_slot(&directory, slot);
            }
        }

        for directory in configured {
            if slots.contains_key(&directory) {
                continue;
            }
            let mut slot = Slot {
                generation: self.generation.fetch_add(1, Ordering::SeqCst),
                state: WatchState::Stopped,
                watcher: None,
                evaluator: None,
            };
            self.start_slot(&directory, &mut slot, 0);
            slots.insert(directory, slot);
        }
    }

    /// Try to start watching. `failures` is the number of earlier failed
    /// attempts for this slot.
    fn start_slot(self: &Arc<Self>, directory: &Path, slot: &mut Slot, failures: u32) {
        let mut watcher = DirectoryWatcher::new(directory, self.watch.clone());
        let events = match watcher.start() {
            Ok(events) => events,
            Err(e) => return self.setup_failed(directory, slot, failures, e.to_string()),
        };

        let evaluator = Evaluator {
            directory: directory.to_path_buf(),
            hub: self.hub.clone(),
            pool: self.pool.clone(),
            max_hops: self.max_hops,
        };
        let spawned = thread::Builder::new()
            .name("fileflow-evaluator".to_string())
            .spawn(move || evaluator.run(events));

        match spawned {
            Ok(handle) => {
                slot.watcher = Some(watcher);
                slot.evaluator = Some(handle);
                slot.state = WatchState::Watching;
                self.hub.publish(RoutingEvent::WatchStarted {
                    directory: directory.to_path_buf(),
                });
            }
            Err(e) => {
                watcher.stop();
                self.setup_failed(directory, slot, failures, e.to_string());
            }
        }
    }

    fn setup_failed(self: &Arc<Self>, directory: &Path, slot: &mut Slot, failures: u32, error: String) {
        let attempt = failures + 1;
        if attempt > self.watch.setup_retries {
            return self.degrade(directory, slot, error);
        }

        let delay = backoff(self.watch.retry_backoff(), attempt);
        let weak = Arc::downgrade(self);
        let path = directory.to_path_buf();
        let generation = slot.generation;
        let spawned = thread::Builder::new()
            .name("fileflow-retry".to_string())
            .spawn(move || {
                thread::sleep(delay);
                retry(weak, &path, generation, attempt);
            });

        match spawned {
            Ok(_) => {
                slot.state = WatchState::Retrying { attempt };
                self.hub.publish(RoutingEvent::WatchRetrying {
                    directory: directory.to_path_buf(),
                    attempt,
                    error,
                });
            }
            Err(e) => {
                tracing::error!("[routing] cannot schedule watch retry: {e}");
                self.degrade(directory, slot, error);
            }
        }
    }

    fn degrade(&self, directory: &Path, slot: &mut Slot, error: String) {
        slot.state = WatchState::Degraded;
        self.hub.placed.lock().forget_directory(directory);
        self.hub.publish(RoutingEvent::WatchDegraded {
            directory: directory.to_path_buf(),
            error,
        });
    }

    fn stop_slot(&self, directory: &Path, mut slot: Slot) {
        let was_watching = slot.watcher.is_some();
        if let Some(mut watcher) = slot.watcher.take() {
            watcher.stop();
        }
        // The producer is gone, so the evaluator drains and exits
        if let Some(handle) = slot.evaluator.take() {
            if handle.join().is_err() {
                tracing::error!("[routing] evaluator for {} panicked", directory.display());
            }
        }
        self.hub.placed.lock().forget_directory(directory);

        if was_watching {
            self.hub.publish(RoutingEvent::WatchStopped {
                directory: directory.to_path_buf(),
            });
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots: Vec<(PathBuf, Slot)> = self.slots.lock().drain().collect();
        for (directory, slot) in slots {
            self.stop_slot(&directory, slot);
        }

        self.pool.shutdown();
        self.hub.log.flush();
        log_event!("routing", "shutdown complete");
    }
}

fn retry(shared: Weak<Shared>, directory: &Path, generation: u64, failures: u32) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut slots = shared.slots.lock();
    if shared.closed.load(Ordering::SeqCst) {
        return;
    }
    let Some(slot) = slots.get_mut(directory) else {
        return;
    };
    if slot.generation != generation || !matches!(slot.state, WatchState::Retrying { .. }) {
        debug_event!("routing", "stale retry", "{}", directory.display());
        return;
    }
    shared.start_slot(directory, slot, failures);
}

/// `base`, `2 * base`, `4 * base`, ... for attempts 1, 2, 3, ...
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent)
}

/// Per-directory worker that decides what happens to each stable file.
struct Evaluator {
    directory: PathBuf,
    hub: Arc<Hub>,
    pool: Arc<MovePool<RouteContext>>,
    max_hops: usize,
}

impl Evaluator {
    fn run(self, events: Receiver<FileEvent>) {
        for event in events.iter() {
            self.evaluate(event);
        }
        debug_event!("routing", "evaluator exited", "{}", self.directory.display());
    }

    fn evaluate(&self, event: FileEvent) {
        if !self.hub.seen.lock().insert(&event.path, event.modified) {
            debug_event!("routing", "duplicate", "{}", event.path.display());
            return;
        }

        self.hub.publish(RoutingEvent::FileObserved {
            directory: self.directory.clone(),
            path: event.path.clone(),
        });

        let placed = self.hub.placed.lock().take(&event.path);
        if let Some(route) = &placed {
            if route.contains(&self.directory) || route.len() >= self.max_hops {
                self.hub.publish(RoutingEvent::LoopSuppressed {
                    directory: self.directory.clone(),
                    path: event.path,
                });
                return;
            }
        }

        let flows = match self.hub.store.flows(&self.directory) {
            Ok(flows) => flows,
            Err(e) => {
                debug_event!("routing", "skipped", "{}: {e}", event.path.display());
                return;
            }
        };

        let Some(flow) = flows.iter().find(|flow| flow.matches(&event.file_name)) else {
            if placed.is_some() {
                debug_event!("routing", "placed file settled", "{}", event.path.display());
            } else {
                self.hub.publish(RoutingEvent::NoMatch {
                    directory: self.directory.clone(),
                    path: event.path,
                });
            }
            return;
        };

        self.hub.publish(RoutingEvent::MatchFound {
            directory: self.directory.clone(),
            path: event.path.clone(),
            pattern: flow.pattern().as_str().to_string(),
            destination: flow.destination().to_path_buf(),
        });

        let mut route = placed.unwrap_or_default();
        route.push(self.directory.clone());
        let job = MoveJob {
            source: event.path,
            destination_dir: flow.destination().to_path_buf(),
            context: RouteContext {
                directory: self.directory.clone(),
                route,
            },
        };

        if let Err(job) = self.pool.submit(job) {
            self.hub.publish(RoutingEvent::MoveFailed {
                directory: self.directory.clone(),
                source: job.source,
                destination_dir: job.destination_dir,
                error: "mover is shut down".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff(base, 1), Duration::from_millis(500));
        assert_eq!(backoff(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff(base, 3), Duration::from_millis(2000));
        // Large attempt counts saturate instead of overflowing
        assert!(backoff(base, 200) >= backoff(base, 16));
    }

    #[test]
    fn test_unknown_directory_is_stopped() {
        let store = Arc::new(FlowStore::new());
        let coordinator =
            RoutingCoordinator::new(store, &Settings::default(), Arc::new(ActionLog::in_memory()));
        assert_eq!(coordinator.watch_state("/nowhere"), WatchState::Stopped);
        assert!(coordinator.states().is_empty());
        coordinator.shutdown();
        coordinator.shutdown();
    }

    #[test]
    fn test_concurrent_reconcile_follows_latest_configuration() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FlowStore::new());
        let coordinator = Arc::new(RoutingCoordinator::new(
            store.clone(),
            &Settings::default(),
            Arc::new(ActionLog::in_memory()),
        ));

        for _ in 0..20 {
            let path = store.add_directory(temp_dir.path()).unwrap();

            let reconciler = {
                let coordinator = coordinator.clone();
                thread::spawn(move || coordinator.reconcile())
            };
            let remover = {
                let coordinator = coordinator.clone();
                let store = store.clone();
                let path = path.clone();
                thread::spawn(move || {
                    store.remove_directory(&path).unwrap();
                    coordinator.reconcile();
                })
            };
            reconciler.join().unwrap();
            remover.join().unwrap();

            // Whichever call ran last saw the removal
            assert_eq!(coordinator.watch_state(&path), WatchState::Stopped);
        }
        coordinator.shutdown();
    }
}
