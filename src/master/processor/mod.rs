//! Per-task state machine run by the master.
//!
//! A [`TaskProcessor`] owns one task instance and reacts to [`TaskAction`]s. What an action
//! does depends on the task type, which selects a [`TaskBehavior`] through the
//! [`TaskProcessorFactory`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{SchedulerError, is_definition_error, is_retryable_error};
use crate::expression::var_pool;
use crate::logging::task_span;
use crate::master::MasterContext;
use crate::model::{ProcessInstance, ProcessorKind, TaskExecutionStatus, TaskInstance};
use crate::service::alert::{Alert, AlertKind, raise};

pub mod blocking;
pub mod common;
pub mod condition;
pub mod dependent;
pub mod stream;
pub mod sub_process;
pub mod switch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
    Stop,
    Pause,
    Timeout,
    Submit,
    Run,
    Dispatch,
}

/// The task instance, its workflow run and the master services, shared by every behavior.
pub struct TaskRuntime {
    pub task: TaskInstance,
    pub process: ProcessInstance,
    pub ctx: Arc<MasterContext>,
}

impl TaskRuntime {
    pub async fn persist(&self) -> Result<()> {
        self.ctx.process_service.update_task_instance(&self.task).await
    }

    /// Stores the task instance, retrying transient failures.
    ///
    /// Returns `Ok(false)` once the configured attempts are used up.
    pub async fn submit_with_retry(&mut self) -> Result<bool> {
        let retries = self.ctx.config.task_commit_retry_times.max(1);
        let now = Local::now().naive_local();
        if self.task.first_submit_time.is_none() {
            self.task.first_submit_time = Some(now);
        }
        self.task.submit_time = Some(now);

        for attempt in 1..=retries {
            match self
                .ctx
                .process_service
                .submit_task(&self.process, &self.task)
                .await
            {
                Ok(stored) => {
                    self.task = stored;
                    info!(task_instance_id = self.task.id, "task instance submitted");
                    return Ok(true);
                }
                Err(e) if !is_retryable_error(&e) => return Err(e),
                Err(e) => {
                    warn!(attempt, retries, error = %e, "task submit failed");
                    if attempt < retries {
                        tokio::time::sleep(self.ctx.config.task_commit_interval()).await;
                    }
                }
            }
        }
        error!(retries, "task submit failed after all retries");
        Ok(false)
    }

    /// Master-side types run where they are evaluated.
    pub async fn start_on_master(&mut self) -> Result<()> {
        self.task.host = Some(self.ctx.host().clone());
        self.task.start_time = Some(Local::now().naive_local());
        self.task.state = TaskExecutionStatus::RunningExecution;
        self.persist().await
    }

    /// Moves the task to a terminal state and persists it.
    ///
    /// Terminal states never change; returns false if the task already finished. OUT variables
    /// of a successful task are merged into the workflow run.
    pub async fn finish(&mut self, state: TaskExecutionStatus) -> Result<bool> {
        if self.task.state.is_finished() {
            debug!(current = %self.task.state, requested = %state, "task already finished");
            return Ok(false);
        }
        self.task.state = state;
        self.task.end_time = Some(Local::now().naive_local());
        self.persist().await?;
        info!(state = %state, "task finished");

        if state.is_success() {
            let outputs = var_pool::outputs(&self.task.var_pool);
            if !outputs.is_empty() {
                self.refresh_process().await?;
                var_pool::merge(&mut self.process.var_pool, &outputs);
                self.ctx
                    .process_service
                    .update_process_instance(&self.process)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Re-reads the workflow run, keeping the cached copy if it disappeared.
    pub async fn refresh_process(&mut self) -> Result<()> {
        if let Some(process) = self
            .ctx
            .process_service
            .find_process_instance_by_id(self.process.id)
            .await?
        {
            self.process = process;
        }
        Ok(())
    }

    pub async fn alert(&self, kind: AlertKind, title: &str, content: serde_json::Value) {
        let alert = Alert::new(kind, title, content, self.process.id).for_task(self.task.id);
        raise(self.ctx.alert.as_ref(), alert).await;
    }

    /// Fails the task because its definition cannot be executed.
    pub async fn fail_definition(&mut self, cause: &str) -> Result<()> {
        error!(cause, "task definition invalid");
        self.finish(TaskExecutionStatus::Failure).await?;
        self.alert(
            AlertKind::DefinitionError,
            "task definition invalid",
            json!({ "taskName": self.task.name, "cause": cause }),
        )
        .await;
        Ok(())
    }
}

/// Type-specific part of the state machine. Every hook returns `Ok(true)` when the action was
/// carried out, `Ok(false)` when it should be retried later.
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    /// Stores the task instance. Master-side tasks also start running here.
    ///
    /// Worker tasks are only stored: whoever runs `Submit` on them must follow up with
    /// `Dispatch` once the processor can be looked up, as `TaskScheduler::submit` does.
    async fn submit(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        if !rt.submit_with_retry().await? {
            return Ok(false);
        }
        rt.start_on_master().await?;
        Ok(true)
    }

    async fn dispatch(&mut self, _rt: &mut TaskRuntime) -> Result<bool> {
        Ok(true)
    }

    async fn run(&mut self, _rt: &mut TaskRuntime) -> Result<bool> {
        Ok(true)
    }

    async fn pause(&mut self, _rt: &mut TaskRuntime) -> Result<bool> {
        info!("pause has no effect on this task type");
        Ok(true)
    }

    /// Stops the task and leaves it in `final_state`.
    async fn kill(&mut self, rt: &mut TaskRuntime, final_state: TaskExecutionStatus) -> Result<bool> {
        rt.finish(final_state).await?;
        Ok(true)
    }

    /// Only streaming tasks support savepoints.
    async fn savepoint(&mut self, _rt: &mut TaskRuntime) -> Result<bool> {
        Ok(false)
    }
}

pub struct TaskProcessor {
    rt: TaskRuntime,
    behavior: Box<dyn TaskBehavior>,
    killed: bool,
    paused: bool,
    timed_out: bool,
}

impl TaskProcessor {
    pub fn new(rt: TaskRuntime, behavior: Box<dyn TaskBehavior>) -> Self {
        Self {
            rt,
            behavior,
            killed: false,
            paused: false,
            timed_out: false,
        }
    }

    pub fn kind(&self) -> ProcessorKind {
        self.behavior.kind()
    }

    pub fn task(&self) -> &TaskInstance {
        &self.rt.task
    }

    pub fn task_mut(&mut self) -> &mut TaskInstance {
        &mut self.rt.task
    }

    pub fn process(&self) -> &ProcessInstance {
        &self.rt.process
    }

    pub fn runtime_mut(&mut self) -> &mut TaskRuntime {
        &mut self.rt
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Runs `action`. Errors never escape: definition errors fail the task and count as
    /// handled, anything else is logged and reported as `false`.
    pub async fn action(&mut self, action: TaskAction) -> bool {
        let span = task_span(&self.rt.task);
        async {
            debug!(action = ?action, state = %self.rt.task.state, "task action");
            match self.apply(action).await {
                Ok(done) => done,
                Err(e) if is_definition_error(&e) => {
                    let cause = e.to_string();
                    match self.rt.fail_definition(&cause).await {
                        Ok(()) => true,
                        Err(persist) => {
                            error!(error = %persist, "failed to store task failure");
                            false
                        }
                    }
                }
                Err(e) => {
                    warn!(action = ?action, error = %e, "task action failed");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn apply(&mut self, action: TaskAction) -> Result<bool> {
        match action {
            TaskAction::Stop => {
                if self.killed {
                    return Ok(true);
                }
                let done = self
                    .behavior
                    .kill(&mut self.rt, TaskExecutionStatus::Kill)
                    .await?;
                self.killed = done;
                Ok(done)
            }
            TaskAction::Pause => {
                if self.paused {
                    return Ok(true);
                }
                let done = self.behavior.pause(&mut self.rt).await?;
                self.paused = done;
                Ok(done)
            }
            TaskAction::Timeout => {
                if self.timed_out {
                    return Ok(true);
                }
                let done = self.timeout().await?;
                self.timed_out = done;
                Ok(done)
            }
            TaskAction::Submit => self.behavior.submit(&mut self.rt).await,
            TaskAction::Run => {
                if self.rt.task.state.is_finished() {
                    return Ok(true);
                }
                self.behavior.run(&mut self.rt).await
            }
            TaskAction::Dispatch => self.behavior.dispatch(&mut self.rt).await,
        }
    }

    async fn timeout(&mut self) -> Result<bool> {
        let timeout = self.rt.task.timeout;
        if !timeout.enabled {
            return Ok(true);
        }
        if timeout.strategy.alerts() {
            warn!(minutes = timeout.minutes, "task timed out");
            self.rt
                .alert(
                    AlertKind::TaskTimeout,
                    "task timeout",
                    json!({ "taskName": self.rt.task.name, "timeoutMinutes": timeout.minutes }),
                )
                .await;
        }
        if timeout.strategy.fails() {
            return self
                .behavior
                .kill(&mut self.rt, TaskExecutionStatus::Failure)
                .await;
        }
        Ok(true)
    }

    pub async fn savepoint(&mut self) -> bool {
        match self.behavior.savepoint(&mut self.rt).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(task_instance_id = self.rt.task.id, error = %e, "savepoint failed");
                false
            }
        }
    }
}

type BehaviorBuilder = fn() -> Box<dyn TaskBehavior>;

/// Maps processor kinds to behaviors. Built once at start-up.
pub struct TaskProcessorFactory {
    builders: HashMap<ProcessorKind, BehaviorBuilder>,
}

impl TaskProcessorFactory {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(ProcessorKind::Common, || Box::new(common::CommonBehavior));
        factory.register(ProcessorKind::Stream, || Box::new(stream::StreamBehavior));
        factory.register(ProcessorKind::Condition, || Box::new(condition::ConditionBehavior));
        factory.register(ProcessorKind::Dependent, || Box::new(dependent::DependentBehavior::new()));
        factory.register(ProcessorKind::Switch, || Box::new(switch::SwitchBehavior));
        factory.register(ProcessorKind::Blocking, || Box::new(blocking::BlockingBehavior));
        factory.register(ProcessorKind::SubProcess, || Box::new(sub_process::SubProcessBehavior));
        factory
    }

    pub fn register(&mut self, kind: ProcessorKind, builder: BehaviorBuilder) {
        self.builders.insert(kind, builder);
    }

    pub fn create(
        &self,
        task: TaskInstance,
        process: ProcessInstance,
        ctx: Arc<MasterContext>,
    ) -> Result<TaskProcessor> {
        let kind = task.processor_kind();
        let builder = self.builders.get(&kind).ok_or_else(|| {
            SchedulerError::definition(format!("no processor for task type {}", task.task_type))
        })?;
        Ok(TaskProcessor::new(TaskRuntime { task, process, ctx }, builder()))
    }
}

impl Default for TaskProcessorFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
