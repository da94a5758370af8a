//! Bounded registry of in-flight worker threads.
//!
//! Used solely for shutdown joins, never for data exchange. The cap keeps
//! rapid phrase segmentation from growing threads without bound: at capacity
//! a new spawn is rejected (capture stays realtime; the caller sheds the
//! work and logs it).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

struct Worker {
    label: String,
    handle: thread::JoinHandle<()>,
}

/// Mutex-guarded set of in-flight worker handles plus a completion channel
/// for timed joins.
pub struct WorkerRegistry {
    max_workers: usize,
    next_id: AtomicU64,
    workers: Mutex<HashMap<u64, Worker>>,
    done_tx: mpsc::UnboundedSender<u64>,
    done_rx: Mutex<mpsc::UnboundedReceiver<u64>>,
}

impl WorkerRegistry {
    pub fn new(max_workers: usize) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            max_workers: max_workers.max(1),
            next_id: AtomicU64::new(0),
            workers: Mutex::new(HashMap::new()),
            done_tx,
            done_rx: Mutex::new(done_rx),
        }
    }

    /// Spawn `f` on a registered thread. Returns `false` (and runs nothing)
    /// when the registry is saturated.
    pub fn spawn<F>(&self, label: &str, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.reap();

        let mut workers = self.workers.lock().unwrap();
        if workers.len() >= self.max_workers {
            warn!(
                "worker registry saturated ({} in flight); rejecting '{}'",
                workers.len(),
                label
            );
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let done = self.done_tx.clone();
        // Insert happens while the lock is held, so a completion signal from a
        // fast worker cannot be reaped before the handle is registered.
        let handle = thread::spawn(move || {
            f();
            let _ = done.send(id);
        });
        workers.insert(
            id,
            Worker {
                label: label.to_string(),
                handle,
            },
        );
        true
    }

    /// Number of workers still running.
    pub fn in_flight(&self) -> usize {
        self.reap();
        self.workers.lock().unwrap().len()
    }

    /// Join every registered worker, waiting at most `per_worker_timeout`
    /// for each next completion. On a timeout the remaining workers are
    /// abandoned (logged, handles dropped) rather than retried, so shutdown
    /// is bounded instead of hanging on a stuck engine. Returns the abandoned
    /// count.
    pub fn join_all(&self, per_worker_timeout: Duration) -> usize {
        self.reap();
        if self.workers.lock().unwrap().is_empty() {
            return 0;
        }

        let rt = tokio::runtime::Runtime::new().unwrap();
        loop {
            if self.workers.lock().unwrap().is_empty() {
                return 0;
            }

            let received = {
                let mut rx = self.done_rx.lock().unwrap();
                rt.block_on(async { tokio::time::timeout(per_worker_timeout, rx.recv()).await })
            };

            match received {
                Ok(Some(id)) => {
                    if let Some(worker) = self.workers.lock().unwrap().remove(&id) {
                        let _ = worker.handle.join();
                    }
                }
                // The registry holds a sender, so the channel cannot close;
                // treat it like a timeout anyway.
                Ok(None) | Err(_) => {
                    let mut workers = self.workers.lock().unwrap();
                    let abandoned = workers.len();
                    for (_, worker) in workers.drain() {
                        warn!(
                            "shutdown timeout: abandoning worker '{}'",
                            worker.label
                        );
                    }
                    return abandoned;
                }
            }
        }
    }

    /// Join workers that already signalled completion, without blocking.
    fn reap(&self) {
        let mut rx = self.done_rx.lock().unwrap();
        while let Ok(id) = rx.try_recv() {
            if let Some(worker) = self.workers.lock().unwrap().remove(&id) {
                let _ = worker.handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn workers_run_and_join() {
        let registry = WorkerRegistry::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let counter = Arc::clone(&counter);
            assert!(registry.spawn(&format!("w{}", i), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(registry.join_all(Duration::from_secs(1)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn saturation_rejects_new_spawns() {
        let registry = WorkerRegistry::new(1);
        let accepted = registry.spawn("sleeper", || {
            thread::sleep(Duration::from_millis(200));
        });
        assert!(accepted);
        assert!(!registry.spawn("rejected", || {}));

        registry.join_all(Duration::from_secs(1));
        assert!(registry.spawn("after-drain", || {}));
        registry.join_all(Duration::from_secs(1));
    }

    #[test]
    fn join_is_bounded_by_the_timeout() {
        let registry = WorkerRegistry::new(2);
        registry.spawn("stuck", || {
            thread::sleep(Duration::from_secs(5));
        });

        let started = Instant::now();
        let abandoned = registry.join_all(Duration::from_millis(100));
        assert_eq!(abandoned, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn completed_workers_are_reaped_before_capacity_checks() {
        let registry = WorkerRegistry::new(1);
        assert!(registry.spawn("quick", || {}));
        thread::sleep(Duration::from_millis(50));
        // The first worker has finished; its slot is reclaimed on spawn.
        assert!(registry.spawn("second", || {}));
        registry.join_all(Duration::from_secs(1));
    }
}
