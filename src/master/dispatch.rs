use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::master::priority::TaskPriority;
use crate::master::processor::TaskAction;
use crate::master::scheduler::TaskScheduler;
use crate::model::Host;
use crate::rpc::command::{Command, CommandType, TaskDispatchRequest};
use crate::service::registry::{HostSelector, WorkerRegistry};

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Moves tasks from the priority queue to workers.
///
/// A worker that cannot be reached or rejects the task is excluded for that task and the
/// task goes back into the queue with its original priority. After `max_dispatch_retries`
/// failed attempts the task fails.
pub struct TaskDispatcher {
    scheduler: Arc<TaskScheduler>,
    registry: Arc<dyn WorkerRegistry>,
    selector: HostSelector,
    // sent, waiting for TASK_DISPATCH_RESPONSE
    awaiting: DashMap<i64, TaskPriority>,
    // taken off the queue or the awaiting table, not yet sent or put back
    in_hand: DashMap<i64, ()>,
}

enum Attempt {
    Sent(Host),
    Skipped,
    Unusable(&'static str),
    Failed(Option<Host>),
}

impl TaskDispatcher {
    pub fn new(scheduler: Arc<TaskScheduler>, registry: Arc<dyn WorkerRegistry>) -> Self {
        Self {
            scheduler,
            registry,
            selector: HostSelector::new(),
            awaiting: DashMap::new(),
            in_hand: DashMap::new(),
        }
    }

    pub fn is_awaiting(&self, task_instance_id: i64) -> bool {
        self.awaiting.contains_key(&task_instance_id)
    }

    /// Takes one entry from the queue and sends it. Returns false when the queue stayed empty.
    ///
    /// Once an entry is taken it is either sent, put back, or its task fails. An error while
    /// preparing the send counts as a failed attempt.
    pub async fn dispatch_once(&self, timeout: Duration) -> Result<bool> {
        let ctx = self.scheduler.context();
        let Some(mut priority) = ctx.queue.poll(timeout).await? else {
            return Ok(false);
        };
        let task_instance_id = priority.task_instance_id;
        self.in_hand.insert(task_instance_id, ());

        let outcome = match self.attempt(&mut priority).await {
            Ok(Attempt::Sent(host)) => {
                self.awaiting.insert(task_instance_id, priority);
                if let Err(e) = self.scheduler.assign_host(task_instance_id, Some(host.clone())).await {
                    warn!(task_instance_id, error = %e, "dispatched host not persisted");
                }
                info!(task_instance_id, host = %host, "task dispatched");
                Ok(())
            }
            Ok(Attempt::Skipped) => Ok(()),
            Ok(Attempt::Unusable(reason)) => self.scheduler.fail_task(task_instance_id, reason).await,
            Ok(Attempt::Failed(host)) => self.requeue_or_fail(priority, host).await,
            Err(e) => {
                warn!(task_instance_id, error = %e, "dispatch attempt failed");
                self.requeue_or_fail(priority, None).await
            }
        };
        self.in_hand.remove(&task_instance_id);
        outcome.map(|()| true)
    }

    async fn attempt(&self, priority: &mut TaskPriority) -> Result<Attempt> {
        let ctx = self.scheduler.context();
        let task_instance_id = priority.task_instance_id;

        match self.scheduler.task_state(task_instance_id).await {
            Some(state) if !state.is_finished() => {}
            state => {
                debug!(task_instance_id, state = ?state, "skipping dispatch of inactive task");
                return Ok(Attempt::Skipped);
            }
        }

        let workers = self.registry.workers(&priority.worker_group).await?;
        let mut candidates: Vec<Host> = workers
            .iter()
            .filter(|h| !priority.excluded_hosts.contains(h))
            .cloned()
            .collect();
        if candidates.is_empty() && !workers.is_empty() {
            debug!(task_instance_id, "every worker excluded, starting over");
            priority.excluded_hosts.clear();
            candidates = workers;
        }
        let Some(host) = self.selector.select(&priority.worker_group, &candidates) else {
            warn!(task_instance_id, worker_group = %priority.worker_group, "no worker in group");
            return Ok(Attempt::Failed(None));
        };

        let Some(mut context) = priority.context.clone() else {
            return Ok(Attempt::Unusable("queued without execution context"));
        };
        context.host = Some(host.clone());
        let command = Command::new(
            CommandType::TaskDispatchRequest,
            ctx.host().clone(),
            &TaskDispatchRequest { context },
        )?;

        match ctx.retry.send(task_instance_id, &host, command).await {
            Ok(()) => Ok(Attempt::Sent(host)),
            Err(e) => {
                warn!(task_instance_id, host = %host, error = %e, "worker unreachable");
                Ok(Attempt::Failed(Some(host)))
            }
        }
    }

    /// The worker took the task.
    pub fn accepted(&self, task_instance_id: i64) {
        self.awaiting.remove(&task_instance_id);
    }

    /// The worker refused the task, typically because its pool is full.
    ///
    /// Never waits on the queue's capacity, so it is safe to call from the command loop.
    pub async fn rejected(&self, task_instance_id: i64, host: &Host) -> Result<()> {
        self.in_hand.insert(task_instance_id, ());
        let outcome = match self.awaiting.remove(&task_instance_id) {
            Some((_, priority)) => {
                warn!(task_instance_id, host = %host, "worker rejected task");
                self.requeue_or_fail(priority, Some(host.clone())).await
            }
            None => {
                debug!(task_instance_id, "rejection for task not awaiting a response");
                Ok(())
            }
        };
        self.in_hand.remove(&task_instance_id);
        outcome
    }

    pub fn forget(&self, task_instance_id: i64) {
        self.awaiting.remove(&task_instance_id);
    }

    async fn requeue_or_fail(&self, mut priority: TaskPriority, failed_host: Option<Host>) -> Result<()> {
        let task_instance_id = priority.task_instance_id;
        let ctx = self.scheduler.context();
        priority.dispatch_failed_times += 1;
        if priority.dispatch_failed_times >= ctx.config.max_dispatch_retries {
            error!(task_instance_id, attempts = priority.dispatch_failed_times, "dispatch attempts exhausted");
            return self
                .scheduler
                .fail_task(task_instance_id, "no worker accepted the task")
                .await;
        }
        if let Some(host) = failed_host {
            if !priority.excluded_hosts.contains(&host) {
                priority.excluded_hosts.push(host);
            }
        }
        if let Err(e) = self.scheduler.assign_host(task_instance_id, None).await {
            warn!(task_instance_id, error = %e, "cleared host not persisted");
        }
        ctx.queue.requeue(priority).await;
        Ok(())
    }

    /// Queues again every task left in DISPATCH without a worker that is not queued, in hand
    /// or waiting for an answer. Returns how many were queued.
    pub async fn requeue_stranded(&self) -> usize {
        let ctx = self.scheduler.context();
        let mut requeued = 0;
        for task_instance_id in self.scheduler.unassigned_dispatches().await {
            if self.in_hand.contains_key(&task_instance_id)
                || self.is_awaiting(task_instance_id)
                || ctx.queue.contains(task_instance_id).await
            {
                continue;
            }
            warn!(task_instance_id, "task stranded in dispatch, queueing again");
            if self.scheduler.action(task_instance_id, TaskAction::Dispatch).await {
                requeued += 1;
            }
        }
        requeued
    }

    /// Consumer loop.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("task dispatcher started");
        let sweep_every = self.scheduler.context().config.state_wheel_interval();
        let mut last_sweep = Instant::now();
        while !*shutdown.borrow() {
            if let Err(e) = self.dispatch_once(POLL_TIMEOUT).await {
                warn!(error = %e, "dispatch failed");
                tokio::time::sleep(POLL_TIMEOUT).await;
            }
            if last_sweep.elapsed() >= sweep_every {
                self.requeue_stranded().await;
                last_sweep = Instant::now();
            }
        }
        info!("task dispatcher stopped");
    }
}
