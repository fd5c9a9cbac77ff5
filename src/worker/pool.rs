use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::worker::runnable::WorkerTaskExecuteRunnable;

struct PoolEntry {
    handle: AbortHandle,
    started: Arc<AtomicBool>,
}

/// Bounded execution pool.
///
/// At most `exec_threads` runnables execute at once and at most `task_queue_size` more wait
/// for a slot; anything beyond is refused at submission.
pub struct WorkerExecutePool {
    exec_threads: usize,
    admission: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    entries: Arc<DashMap<i64, PoolEntry>>,
}

impl WorkerExecutePool {
    pub fn new(exec_threads: usize, task_queue_size: usize) -> Self {
        let exec_threads = exec_threads.max(1);
        Self {
            exec_threads,
            admission: Arc::new(Semaphore::new(exec_threads + task_queue_size)),
            slots: Arc::new(Semaphore::new(exec_threads)),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Queues a runnable. Returns false when the pool is full.
    pub fn submit(&self, runnable: WorkerTaskExecuteRunnable) -> bool {
        let Ok(admission) = Arc::clone(&self.admission).try_acquire_owned() else {
            return false;
        };
        let task_instance_id = runnable.task_instance_id();
        let started = Arc::new(AtomicBool::new(false));
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let slots = Arc::clone(&self.slots);
        let entries = Arc::clone(&self.entries);
        let started_flag = Arc::clone(&started);
        let handle = tokio::spawn(async move {
            let _admission = admission;
            // the entry must exist before it can be removed below
            let _ = registered_rx.await;
            let Ok(_slot) = slots.acquire_owned().await else {
                entries.remove(&task_instance_id);
                return;
            };
            started_flag.store(true, Ordering::SeqCst);
            runnable.run().await;
            entries.remove(&task_instance_id);
        });

        self.entries.insert(
            task_instance_id,
            PoolEntry {
                handle: handle.abort_handle(),
                started,
            },
        );
        let _ = registered_tx.send(());
        debug!(task_instance_id, "runnable queued");
        true
    }

    /// Drops a runnable that has not started yet. False if it is running or unknown.
    pub fn kill_pending(&self, task_instance_id: i64) -> bool {
        let removed = self
            .entries
            .remove_if(&task_instance_id, |_, e| !e.started.load(Ordering::SeqCst));
        match removed {
            Some((_, entry)) => {
                entry.handle.abort();
                info!(task_instance_id, "pending task removed from pool");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, task_instance_id: i64) -> bool {
        self.entries
            .get(&task_instance_id)
            .is_some_and(|e| !e.started.load(Ordering::SeqCst))
    }

    pub fn contains(&self, task_instance_id: i64) -> bool {
        self.entries.contains_key(&task_instance_id)
    }

    /// Runnables currently holding an execution slot.
    pub fn running(&self) -> usize {
        self.exec_threads - self.slots.available_permits()
    }

    /// Runnables queued or running.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
