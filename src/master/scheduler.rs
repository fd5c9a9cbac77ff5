use anyhow::{Result, anyhow};
use chrono::{Local, TimeDelta};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::master::MasterContext;
use crate::master::dispatch::TaskDispatcher;
use crate::master::processor::{TaskAction, TaskProcessor, TaskProcessorFactory};
use crate::model::{
    Host, ProcessInstance, TaskExecutionStatus, TaskInstance, WorkflowExecutionStatus,
};
use crate::rpc::command::{
    Command, CommandType, TaskExecuteResult, TaskExecuteRunning, WorkflowHostChangeRequest,
    WorkflowStateEventChange,
};
use crate::rpc::retry::ExhaustedMessage;
use crate::service::alert::AlertKind;

type SharedProcessor = Arc<Mutex<TaskProcessor>>;

/// Owns the processors of every active task instance on this master.
///
/// Actions on one task instance are serialized by the processor's mutex.
pub struct TaskScheduler {
    ctx: Arc<MasterContext>,
    factory: TaskProcessorFactory,
    processors: DashMap<i64, SharedProcessor>,
}

impl TaskScheduler {
    pub fn new(ctx: Arc<MasterContext>, factory: TaskProcessorFactory) -> Self {
        Self {
            ctx,
            factory,
            processors: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<MasterContext> {
        &self.ctx
    }

    fn processor(&self, task_instance_id: i64) -> Option<SharedProcessor> {
        self.processors
            .get(&task_instance_id)
            .map(|p| Arc::clone(p.value()))
    }

    /// Submits a task instance and, for worker tasks, dispatches it.
    ///
    /// Returns the stored task instance id.
    pub async fn submit(&self, process: ProcessInstance, task: TaskInstance) -> Result<i64> {
        let mut processor = self.factory.create(task, process, Arc::clone(&self.ctx))?;
        if !processor.action(TaskAction::Submit).await {
            return Err(SchedulerError::transient(format!(
                "task {} could not be submitted",
                processor.task().name
            ))
            .into());
        }
        let id = processor.task().id;
        let dispatched = processor.kind().is_dispatched();
        let shared = Arc::new(Mutex::new(processor));
        self.processors.insert(id, Arc::clone(&shared));

        if dispatched {
            let mut processor = shared.lock().await;
            if !processor.action(TaskAction::Dispatch).await {
                warn!(task_instance_id = id, "dispatch deferred to next tick");
            }
        }
        Ok(id)
    }

    /// Takes over a task that is already running on a worker, e.g. after its master went away.
    ///
    /// The worker is told to send its reports here from now on.
    pub async fn adopt(&self, process: ProcessInstance, task: TaskInstance) -> Result<()> {
        let id = task.id;
        let worker = task.host.clone().filter(|h| !h.is_empty());
        let processor = self.factory.create(task, process, Arc::clone(&self.ctx))?;
        let dispatched = processor.kind().is_dispatched();
        self.processors.insert(id, Arc::new(Mutex::new(processor)));

        if let (true, Some(worker)) = (dispatched, worker) {
            let command = Command::new(
                CommandType::WorkflowHostChangeRequest,
                self.ctx.host().clone(),
                &WorkflowHostChangeRequest {
                    task_instance_id: id,
                    workflow_host: self.ctx.host().clone(),
                },
            )?;
            self.ctx.retry.send_tracked(id, &worker, command).await;
            info!(task_instance_id = id, worker = %worker, "took over task");
        }
        Ok(())
    }

    /// Runs `action` on a known task instance. False for unknown ids.
    pub async fn action(&self, task_instance_id: i64, action: TaskAction) -> bool {
        let Some(processor) = self.processor(task_instance_id) else {
            warn!(task_instance_id, action = ?action, "no processor for task");
            return false;
        };
        let mut processor = processor.lock().await;
        processor.action(action).await
    }

    pub async fn stop(&self, task_instance_id: i64) -> bool {
        self.action(task_instance_id, TaskAction::Stop).await
    }

    pub async fn pause(&self, task_instance_id: i64) -> bool {
        self.action(task_instance_id, TaskAction::Pause).await
    }

    pub async fn savepoint(&self, task_instance_id: i64) -> bool {
        let Some(processor) = self.processor(task_instance_id) else {
            return false;
        };
        let mut processor = processor.lock().await;
        processor.savepoint().await
    }

    pub async fn task(&self, task_instance_id: i64) -> Option<TaskInstance> {
        let processor = self.processor(task_instance_id)?;
        let processor = processor.lock().await;
        Some(processor.task().clone())
    }

    pub async fn task_state(&self, task_instance_id: i64) -> Option<TaskExecutionStatus> {
        self.task(task_instance_id).await.map(|t| t.state)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Worker tasks in DISPATCH that no worker has been assigned to.
    pub async fn unassigned_dispatches(&self) -> Vec<i64> {
        let active: Vec<SharedProcessor> = self
            .processors
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect();
        let mut ids = Vec::new();
        for processor in active {
            let processor = processor.lock().await;
            let task = processor.task();
            if processor.kind().is_dispatched()
                && task.state == TaskExecutionStatus::Dispatch
                && task.host.as_ref().is_none_or(|h| h.is_empty())
            {
                ids.push(task.id);
            }
        }
        ids
    }

    /// Records the worker a task was sent to; `None` clears it after a failed dispatch.
    pub async fn assign_host(&self, task_instance_id: i64, host: Option<Host>) -> Result<()> {
        let processor = self
            .processor(task_instance_id)
            .ok_or_else(|| anyhow!("Unknown task instance {}", task_instance_id))?;
        let mut processor = processor.lock().await;
        let rt = processor.runtime_mut();
        if rt.task.state.is_finished() {
            return Ok(());
        }
        rt.task.host = host;
        rt.persist().await
    }

    pub async fn fail_task(&self, task_instance_id: i64, reason: &str) -> Result<()> {
        let processor = self
            .processor(task_instance_id)
            .ok_or_else(|| anyhow!("Unknown task instance {}", task_instance_id))?;
        let mut processor = processor.lock().await;
        let rt = processor.runtime_mut();
        if rt.finish(TaskExecutionStatus::Failure).await? {
            error!(task_instance_id, reason, "task failed");
            rt.alert(
                AlertKind::TaskFailure,
                "task failed",
                json!({ "taskName": rt.task.name, "cause": reason }),
            )
            .await;
        }
        Ok(())
    }

    /// Applies a RUNNING / DELAY_EXECUTION report from a worker.
    pub async fn on_running(&self, report: &TaskExecuteRunning) -> Result<()> {
        let Some(processor) = self.processor(report.task_instance_id) else {
            warn!(task_instance_id = report.task_instance_id, "running report for unknown task");
            return Ok(());
        };
        let mut processor = processor.lock().await;
        let rt = processor.runtime_mut();
        if rt.task.state.is_finished() {
            debug!(task_instance_id = rt.task.id, state = %rt.task.state, "running report after finish ignored");
            return Ok(());
        }
        rt.task.state = report.status;
        rt.task.host = Some(report.host.clone());
        rt.task.start_time = report.start_time.or(rt.task.start_time);
        rt.task.execute_path = report.execute_path.clone();
        rt.task.log_path = report.log_path.clone().or(rt.task.log_path.take());
        if report.process_id != 0 {
            rt.task.process_id = report.process_id;
        }
        if report.app_ids.is_some() {
            rt.task.app_ids = report.app_ids.clone();
        }
        rt.persist().await?;
        info!(task_instance_id = rt.task.id, state = %report.status, host = %report.host, "task running");
        Ok(())
    }

    /// Applies the final report from a worker.
    pub async fn on_result(&self, report: &TaskExecuteResult) -> Result<()> {
        let Some(processor) = self.processor(report.task_instance_id) else {
            warn!(task_instance_id = report.task_instance_id, "result for unknown task");
            return Ok(());
        };
        let mut processor = processor.lock().await;
        let rt = processor.runtime_mut();
        if !rt.task.state.is_finished() {
            rt.task.var_pool = report.var_pool.clone();
            rt.task.app_ids = report.app_ids.clone();
            rt.task.process_id = report.process_id;
            rt.task.start_time = report.start_time.or(rt.task.start_time);
            rt.task.execute_path = report.execute_path.clone().or(rt.task.execute_path.take());
            rt.finish(report.status).await?;
        }
        // whatever was still in flight for this task is moot now
        rt.ctx.retry.remove_task(report.task_instance_id);
        Ok(())
    }

    /// Stops or pauses every task of a workflow run on request of a parent workflow.
    pub async fn on_workflow_state_event(&self, event: &WorkflowStateEventChange) -> Result<()> {
        let Some(mut process) = self
            .ctx
            .process_service
            .find_process_instance_by_id(event.process_instance_id)
            .await?
        else {
            warn!(process_instance_id = event.process_instance_id, "state event for unknown workflow run");
            return Ok(());
        };

        let (action, final_state) = match event.state {
            WorkflowExecutionStatus::ReadyStop => (TaskAction::Stop, WorkflowExecutionStatus::Stop),
            WorkflowExecutionStatus::ReadyPause => (TaskAction::Pause, WorkflowExecutionStatus::Pause),
            other => {
                debug!(state = ?other, "state event needs no task action");
                return Ok(());
            }
        };

        let members: Vec<SharedProcessor> = self
            .processors
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect();
        for processor in members {
            let mut processor = processor.lock().await;
            if processor.process().id == event.process_instance_id && !processor.task().state.is_finished() {
                processor.action(action).await;
            }
        }

        process.state = final_state;
        process.end_time = Some(Local::now().naive_local());
        self.ctx.process_service.update_process_instance(&process).await?;
        info!(process_instance_id = process.id, state = ?final_state, "workflow run state changed");
        Ok(())
    }

    /// One pass over active tasks: evaluates master-side tasks and fires overdue timeouts.
    pub async fn tick(&self) {
        let now = Local::now().naive_local();
        let active: Vec<SharedProcessor> = self
            .processors
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect();

        for processor in active {
            let mut processor = processor.lock().await;
            if processor.task().state.is_finished() {
                continue;
            }
            if !processor.kind().is_dispatched() {
                processor.action(TaskAction::Run).await;
            } else if processor.task().state == TaskExecutionStatus::SubmittedSuccess {
                processor.action(TaskAction::Dispatch).await;
            }

            let task = processor.task();
            let timeout = task.timeout;
            let overdue = timeout.enabled
                && !task.state.is_finished()
                && task
                    .start_time
                    .is_some_and(|start| start + TimeDelta::minutes(i64::from(timeout.minutes)) <= now);
            if overdue && !processor.is_timed_out() {
                processor.action(TaskAction::Timeout).await;
            }
        }
    }

    /// Forgets finished tasks that have nothing left in flight.
    pub async fn evict_finished(&self) {
        let ids: Vec<i64> = self.processors.iter().map(|p| *p.key()).collect();
        for id in ids {
            let Some(processor) = self.processor(id) else {
                continue;
            };
            let finished = processor.lock().await.task().state.is_finished();
            let in_flight = self.ctx.retry.contains(id, CommandType::TaskKillRequest)
                || self.ctx.retry.contains(id, CommandType::TaskDispatchRequest);
            if finished && !in_flight {
                self.processors.remove(&id);
            }
        }
    }

    /// State wheel.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("task scheduler started");
        let mut interval = tokio::time::interval(self.ctx.config.state_wheel_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                    self.evict_finished().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("task scheduler stopped");
    }

    /// Reacts to commands the retry runner gave up on.
    pub async fn watch_exhausted(
        self: Arc<Self>,
        mut exhausted: mpsc::UnboundedReceiver<ExhaustedMessage>,
        dispatcher: Arc<TaskDispatcher>,
    ) {
        while let Some(message) = exhausted.recv().await {
            match message.command_type {
                CommandType::TaskDispatchRequest => {
                    dispatcher.forget(message.task_instance_id);
                    if let Err(e) = self
                        .fail_task(message.task_instance_id, "dispatch was never acknowledged")
                        .await
                    {
                        warn!(task_instance_id = message.task_instance_id, error = %e, "could not fail task");
                    }
                }
                CommandType::TaskKillRequest => {
                    error!(
                        task_instance_id = message.task_instance_id,
                        host = %message.destination,
                        "worker never confirmed kill"
                    );
                }
                other => {
                    warn!(task_instance_id = message.task_instance_id, command_type = %other, "command gave up");
                }
            }
        }
    }
}
