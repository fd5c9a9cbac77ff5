use anyhow::{Result, anyhow};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use crate::model::{Host, Priority, ProcessInstance, TaskExecutionContext, TaskInstance};

/// Queue entry. Ordered by
/// `(process priority, process instance id, task priority, task instance id, task group priority, worker group)`,
/// smallest first. The context and the dispatch bookkeeping do not take part in ordering.
#[derive(Debug, Clone)]
pub struct TaskPriority {
    pub process_instance_priority: Priority,
    pub process_instance_id: i64,
    pub task_instance_priority: Priority,
    pub task_instance_id: i64,
    pub task_group_priority: i32,
    pub worker_group: String,
    pub context: Option<TaskExecutionContext>,
    pub dispatch_failed_times: u32,
    pub excluded_hosts: Vec<Host>,
}

impl TaskPriority {
    pub fn new(
        process_instance_priority: Priority,
        process_instance_id: i64,
        task_instance_priority: Priority,
        task_instance_id: i64,
        task_group_priority: i32,
        worker_group: impl Into<String>,
    ) -> Self {
        Self {
            process_instance_priority,
            process_instance_id,
            task_instance_priority,
            task_instance_id,
            task_group_priority,
            worker_group: worker_group.into(),
            context: None,
            dispatch_failed_times: 0,
            excluded_hosts: Vec::new(),
        }
    }

    pub fn of(process: &ProcessInstance, task: &TaskInstance) -> Self {
        Self::new(
            process.priority,
            process.id,
            task.task_priority,
            task.id,
            task.task_group_priority,
            task.worker_group.clone(),
        )
    }

    pub fn with_context(mut self, context: TaskExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    fn key(&self) -> (Priority, i64, Priority, i64, i32, &str) {
        (
            self.process_instance_priority,
            self.process_instance_id,
            self.task_instance_priority,
            self.task_instance_id,
            self.task_group_priority,
            self.worker_group.as_str(),
        )
    }
}

impl PartialEq for TaskPriority {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TaskPriority {}

impl PartialOrd for TaskPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

struct QueueState {
    heap: BinaryHeap<Reverse<TaskPriority>>,
    // entries requeued past capacity; their pop gives no slot back
    overflow: usize,
}

/// Bounded queue of tasks waiting for a worker.
///
/// `put` waits for a free slot and `take` waits for an entry. Entries come out smallest first.
/// `requeue` never waits: an entry handed back by the consumer may push the queue past capacity.
pub struct PriorityDispatchQueue {
    state: Mutex<QueueState>,
    free_slots: Semaphore,
    queued: Semaphore,
    capacity: usize,
}

impl PriorityDispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                overflow: 0,
            }),
            free_slots: Semaphore::new(capacity),
            queued: Semaphore::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn put(&self, priority: TaskPriority) -> Result<()> {
        self.free_slots
            .acquire()
            .await
            .map_err(|_| anyhow!("Dispatch queue closed"))?
            .forget();
        self.state.lock().await.heap.push(Reverse(priority));
        self.queued.add_permits(1);
        Ok(())
    }

    /// Puts back an entry taken earlier, without waiting for a free slot.
    pub async fn requeue(&self, priority: TaskPriority) {
        let mut state = self.state.lock().await;
        match self.free_slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => state.overflow += 1,
        }
        state.heap.push(Reverse(priority));
        self.queued.add_permits(1);
    }

    pub async fn take(&self) -> Result<TaskPriority> {
        self.queued
            .acquire()
            .await
            .map_err(|_| anyhow!("Dispatch queue closed"))?
            .forget();
        self.pop().await
    }

    /// Like `take`, giving up after `timeout`.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<TaskPriority>> {
        match tokio::time::timeout(timeout, self.queued.acquire()).await {
            Ok(permit) => {
                permit.map_err(|_| anyhow!("Dispatch queue closed"))?.forget();
                self.pop().await.map(Some)
            }
            Err(_) => Ok(None),
        }
    }

    async fn pop(&self) -> Result<TaskPriority> {
        let mut state = self.state.lock().await;
        let Reverse(priority) = state
            .heap
            .pop()
            .ok_or_else(|| anyhow!("Dispatch queue out of sync"))?;
        if state.overflow > 0 {
            state.overflow -= 1;
        } else {
            self.free_slots.add_permits(1);
        }
        Ok(priority)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.heap.is_empty()
    }

    pub async fn contains(&self, task_instance_id: i64) -> bool {
        self.state
            .lock()
            .await
            .heap
            .iter()
            .any(|Reverse(p)| p.task_instance_id == task_instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = TaskPriority::new(Priority::High, 5, Priority::Low, 1, 0, "default");
        let b = TaskPriority::new(Priority::Medium, 1, Priority::Highest, 1, 0, "default");
        let c = TaskPriority::new(Priority::High, 5, Priority::Low, 2, 0, "default");
        assert!(a < b);
        assert!(a < c);

        let mut d = a.clone();
        d.dispatch_failed_times = 2;
        d.excluded_hosts.push(Host::new("w:1"));
        assert_eq!(a, d);
    }

    #[tokio::test]
    async fn poll_times_out_on_empty_queue() {
        let queue = PriorityDispatchQueue::new(2);
        assert!(queue.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_past_capacity_does_not_wait() {
        let queue = PriorityDispatchQueue::new(1);
        queue.put(TaskPriority::new(Priority::Medium, 1, Priority::Medium, 1, 0, "default")).await.unwrap();
        let taken = queue.take().await.unwrap();

        // a producer grabs the freed slot first
        queue.put(TaskPriority::new(Priority::Medium, 1, Priority::Medium, 2, 0, "default")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), queue.requeue(taken))
            .await
            .expect("requeue waited for a slot");
        assert_eq!(queue.len().await, 2);

        // draining the overflow gives back exactly one slot
        queue.take().await.unwrap();
        queue.take().await.unwrap();
        assert_eq!(queue.free_slots.available_permits(), 1);
    }
}
