use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::expression::var_pool;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::{ProcessorKind, TaskExecutionStatus, WorkflowExecutionStatus};
use crate::rpc::command::{Command, CommandType, WorkflowStateEventChange};

/// Runs a child workflow and takes over its outcome.
pub struct SubProcessBehavior;

/// Moves the child run to `state` and tells the master that owns it.
///
/// Returns false when the child run does not exist yet.
async fn signal_child(rt: &mut TaskRuntime, state: WorkflowExecutionStatus) -> Result<bool> {
    let Some(mut child) = rt
        .ctx
        .process_service
        .find_sub_process_instance(rt.process.id, rt.task.id)
        .await?
    else {
        return Ok(false);
    };
    if child.state.is_finished() {
        return Ok(true);
    }

    child.state = state;
    rt.ctx.process_service.update_process_instance(&child).await?;

    let owner = child.host.clone().unwrap_or_else(|| rt.ctx.host().clone());
    let command = Command::new(
        CommandType::WorkflowStateEventChange,
        rt.ctx.host().clone(),
        &WorkflowStateEventChange {
            process_instance_id: child.id,
            task_instance_id: rt.task.id,
            state,
        },
    )?;
    if let Err(e) = rt.ctx.retry.send_untracked(&owner, &command).await {
        warn!(host = %owner, error = %e, "failed to notify sub-process owner");
    }
    info!(child = child.id, state = ?state, "sub-process signalled");
    Ok(true)
}

#[async_trait]
impl TaskBehavior for SubProcessBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SubProcess
    }

    async fn run(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        let Some(child) = rt
            .ctx
            .process_service
            .find_sub_process_instance(rt.process.id, rt.task.id)
            .await?
        else {
            debug!("waiting for sub-process to start");
            return Ok(true);
        };
        if !child.state.is_finished() {
            return Ok(true);
        }

        let end_tasks = rt.ctx.process_service.find_end_task_instances(child.id).await?;
        let outputs = var_pool::merge_end_node_var_pools(&end_tasks);
        var_pool::merge(&mut rt.task.var_pool, &outputs);

        let state = child.state.as_task_status();
        info!(child = child.id, child_state = ?child.state, state = %state, "sub-process finished");
        rt.finish(state).await?;
        Ok(true)
    }

    async fn pause(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        if !signal_child(rt, WorkflowExecutionStatus::ReadyPause).await? {
            debug!("sub-process not started, paused locally");
            rt.finish(TaskExecutionStatus::Pause).await?;
        }
        Ok(true)
    }

    async fn kill(&mut self, rt: &mut TaskRuntime, final_state: TaskExecutionStatus) -> Result<bool> {
        let signalled = signal_child(rt, WorkflowExecutionStatus::ReadyStop).await?;
        if !signalled {
            debug!("sub-process not started, killed locally");
        }
        // a signalled child reports its own outcome for a plain stop
        if !signalled || final_state != TaskExecutionStatus::Kill {
            rt.finish(final_state).await?;
        }
        Ok(true)
    }
}
