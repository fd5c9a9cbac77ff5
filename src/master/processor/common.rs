use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};


use crate::master::context_builder::build_execution_context;
use crate::master::priority::TaskPriority;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::{ProcessorKind, TaskExecutionStatus};
use crate::rpc::command::{Command, CommandType, TaskKillRequest};

/// Tasks executed by a worker plugin.
pub struct CommonBehavior;

/// Resolves the execution context and queues the task for a worker.
pub(crate) async fn dispatch_to_queue(rt: &mut TaskRuntime) -> Result<bool> {
    let state = rt.task.state;
    if state.is_finished() {
        debug!(state = %state, "task already finished, not dispatching");
        return Ok(true);
    }
    if state.is_running() {
        debug!(state = %state, "task already running on a worker");
        return Ok(true);
    }
    if state == TaskExecutionStatus::Dispatch && rt.ctx.queue.contains(rt.task.id).await {
        debug!("task already queued");
        return Ok(true);
    }

    let already_admitted = state == TaskExecutionStatus::Dispatch;
    let context = build_execution_context(rt).await?;
    rt.task.state = TaskExecutionStatus::Dispatch;
    rt.persist().await?;

    let priority = TaskPriority::of(&rt.process, &rt.task).with_context(context);
    if already_admitted {
        // lost its queue entry; putting it back must not wait behind new work
        rt.ctx.queue.requeue(priority).await;
    } else {
        rt.ctx.queue.put(priority).await?;
    }
    info!(worker_group = %rt.task.worker_group, "task queued for dispatch");
    Ok(true)
}

/// Marks the task with `final_state` and asks the worker to stop it if one was assigned.
pub(crate) async fn kill_on_worker(rt: &mut TaskRuntime, final_state: TaskExecutionStatus) -> Result<bool> {
    if rt.task.state.is_finished() {
        debug!(state = %rt.task.state, "task already finished, nothing to kill");
        return Ok(true);
    }
    rt.finish(final_state).await?;

    let Some(host) = rt.task.host.clone().filter(|h| !h.is_empty()) else {
        info!("task not on a worker yet, killed locally");
        return Ok(true);
    };
    let command = Command::new(
        CommandType::TaskKillRequest,
        rt.ctx.host().clone(),
        &TaskKillRequest {
            task_instance_id: rt.task.id,
        },
    )?;
    rt.ctx.retry.send_tracked(rt.task.id, &host, command).await;
    info!(host = %host, "kill request sent");
    Ok(true)
}

#[async_trait]
impl TaskBehavior for CommonBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Common
    }

    /// Only stores the task; it stays SUBMITTED_SUCCESS until `Dispatch`. The caller registers
    /// the processor first, so the dispatcher never pops a task it cannot look up.
    async fn submit(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        rt.submit_with_retry().await
    }

    async fn dispatch(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        dispatch_to_queue(rt).await
    }

    async fn kill(&mut self, rt: &mut TaskRuntime, final_state: TaskExecutionStatus) -> Result<bool> {
        kill_on_worker(rt, final_state).await
    }
}
