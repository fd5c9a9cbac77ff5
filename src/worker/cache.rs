use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::model::TaskExecutionContext;
use crate::plugin::ExecutableTask;

struct CacheEntry {
    context: TaskExecutionContext,
    task: Option<Arc<dyn ExecutableTask>>,
    cancelled: bool,
    cancel_signal: Arc<Notify>,
}

/// Contexts of the task instances this worker accepted and has not yet reported as acked.
#[derive(Default)]
pub struct TaskExecutionContextCache {
    entries: DashMap<i64, CacheEntry>,
}

impl TaskExecutionContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a context. Returns false if the task instance is already known.
    pub fn put(&self, context: TaskExecutionContext) -> bool {
        let id = context.task_instance_id;
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            CacheEntry {
                context,
                task: None,
                cancelled: false,
                cancel_signal: Arc::new(Notify::new()),
            },
        );
        true
    }

    pub fn context(&self, task_instance_id: i64) -> Option<TaskExecutionContext> {
        self.entries
            .get(&task_instance_id)
            .map(|e| e.context.clone())
    }

    /// Applies `f` to the cached context and returns the updated copy.
    pub fn update<F>(&self, task_instance_id: i64, f: F) -> Option<TaskExecutionContext>
    where
        F: FnOnce(&mut TaskExecutionContext),
    {
        let mut entry = self.entries.get_mut(&task_instance_id)?;
        f(&mut entry.context);
        Some(entry.context.clone())
    }

    /// Remembers the running plugin instance so kill and savepoint requests can reach it.
    pub fn attach_task(&self, task_instance_id: i64, task: Arc<dyn ExecutableTask>) {
        if let Some(mut entry) = self.entries.get_mut(&task_instance_id) {
            entry.task = Some(task);
        }
    }

    pub fn executable(&self, task_instance_id: i64) -> Option<Arc<dyn ExecutableTask>> {
        self.entries
            .get(&task_instance_id)
            .and_then(|e| e.task.clone())
    }

    /// Marks the task cancelled and wakes a runnable waiting on [`Self::cancel_signal`].
    ///
    /// Returns the running plugin instance, if any.
    pub fn cancel(&self, task_instance_id: i64) -> Option<Arc<dyn ExecutableTask>> {
        let mut entry = self.entries.get_mut(&task_instance_id)?;
        entry.cancelled = true;
        entry.cancel_signal.notify_one();
        entry.task.clone()
    }

    pub fn is_cancelled(&self, task_instance_id: i64) -> bool {
        self.entries
            .get(&task_instance_id)
            .is_some_and(|e| e.cancelled)
    }

    pub fn cancel_signal(&self, task_instance_id: i64) -> Option<Arc<Notify>> {
        self.entries
            .get(&task_instance_id)
            .map(|e| Arc::clone(&e.cancel_signal))
    }

    pub fn remove(&self, task_instance_id: i64) -> Option<TaskExecutionContext> {
        self.entries
            .remove(&task_instance_id)
            .map(|(_, e)| e.context)
    }

    pub fn contains(&self, task_instance_id: i64) -> bool {
        self.entries.contains_key(&task_instance_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
