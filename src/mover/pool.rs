//! Bounded worker pool for move jobs.
//!
//! Jobs queue on a bounded channel; `workers` threads drain it. Jobs that
//! target the same destination directory take that directory's lock, so the
//! collision suffix each one picks is deterministic.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::error::MoveError;
use super::transfer::{MoveOutcome, Mover};

/// One queued move. `context` travels with the job back to the completion
/// callback untouched.
#[derive(Debug, Clone)]
pub struct MoveJob<C> {
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub context: C,
}

type Completion<C> = dyn Fn(&MoveJob<C>, &Result<MoveOutcome, MoveError>) + Send + Sync;

pub struct MovePool<C> {
    sender: Mutex<Option<Sender<MoveJob<C>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl<C: Send + 'static> MovePool<C> {
    /// Spawn `workers` threads. `on_complete` runs on the worker thread
    /// after each job, successful or not.
    pub fn start<F>(mover: Mover, workers: usize, capacity: usize, on_complete: F) -> Self
    where
        F: Fn(&MoveJob<C>, &Result<MoveOutcome, MoveError>) + Send + Sync + 'static,
    {
        let (tx, rx) = bounded::<MoveJob<C>>(capacity.max(1));
        let on_complete: Arc<Completion<C>> = Arc::new(on_complete);
        let locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>> = Arc::new(DashMap::new());
        let pending = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers.max(1))
            .filter_map(|id| {
                let worker = Worker {
                    mover: mover.clone(),
                    rx: rx.clone(),
                    locks: locks.clone(),
                    on_complete: on_complete.clone(),
                    pending: pending.clone(),
                };
                thread::Builder::new()
                    .name(format!("fileflow-mover-{id}"))
                    .spawn(move || worker.run())
                    .map_err(|e| tracing::error!("[mover] failed to spawn worker {id}: {e}"))
                    .ok()
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            pending,
        }
    }

    /// Queue a job, blocking while the queue is full.
    ///
    /// Returns the job back once the pool has been shut down.
    pub fn submit(&self, job: MoveJob<C>) -> Result<(), MoveJob<C>> {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(job);
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(job).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            e.into_inner()
        })
    }

    /// Jobs submitted but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait for every queued job to finish.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("[mover] worker panicked");
            }
        }
    }
}

impl<C> Drop for MovePool<C> {
    fn drop(&mut self) {
        drop(self.sender.lock().take());
        for handle in std::mem::take(&mut *self.workers.lock()) {
            let _ = handle.join();
        }
    }
}

struct Worker<C> {
    mover: Mover,
    rx: Receiver<MoveJob<C>>,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
    on_complete: Arc<Completion<C>>,
    pending: Arc<AtomicUsize>,
}

impl<C> Worker<C> {
    fn run(self) {
        for job in self.rx.iter() {
            let lock = self
                .locks
                .entry(job.destination_dir.clone())
                .or_default()
                .clone();

            let result = {
                let _guard = lock.lock();
                self.mover.move_file(&job.source, &job.destination_dir)
            };

            (self.on_complete)(&job, &result);
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_idle<C: Send + 'static>(pool: &MovePool<C>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.pending() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_same_destination_jobs_get_distinct_names() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        let results = Arc::new(Mutex::new(Vec::new()));

        let sink = results.clone();
        let pool = MovePool::start(Mover::default(), 4, 16, move |job: &MoveJob<usize>, res| {
            sink.lock()
                .push((job.context, res.as_ref().map(|o| o.destination.clone()).ok()));
        });

        for i in 0..8 {
            let src_dir = temp_dir.path().join(format!("in{i}"));
            fs::create_dir_all(&src_dir).unwrap();
            let source = src_dir.join("a.txt");
            fs::write(&source, format!("{i}")).unwrap();
            pool.submit(MoveJob {
                source,
                destination_dir: out.clone(),
                context: i,
            })
            .unwrap();
        }

        wait_idle(&pool);
        pool.shutdown();

        let results = results.lock();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|(_, dest)| dest.is_some()));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 8);
        assert!(out.join("a.txt").exists());
        assert!(out.join("a (7).txt").exists());
    }

    #[test]
    fn test_shutdown_drains_queue_and_rejects_new_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("in");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&src).unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let pool = MovePool::start(Mover::default(), 1, 4, move |_: &MoveJob<()>, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..4 {
            let source = src.join(format!("f{i}.txt"));
            fs::write(&source, "x").unwrap();
            pool.submit(MoveJob {
                source,
                destination_dir: out.clone(),
                context: (),
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(pool.pending(), 0);

        let rejected = pool.submit(MoveJob {
            source: src.join("late.txt"),
            destination_dir: out,
            context: (),
        });
        assert!(rejected.is_err());
    }
}
