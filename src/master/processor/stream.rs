use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::master::processor::common::{dispatch_to_queue, kill_on_worker};
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::{ProcessorKind, TaskExecutionStatus};
use crate::rpc::command::{Command, CommandType, TaskSavepointRequest};

/// Long-running streaming jobs. Run like common tasks and additionally take savepoints.
pub struct StreamBehavior;

#[async_trait]
impl TaskBehavior for StreamBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Stream
    }

    async fn submit(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        rt.submit_with_retry().await
    }

    async fn dispatch(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        dispatch_to_queue(rt).await
    }

    async fn kill(&mut self, rt: &mut TaskRuntime, final_state: TaskExecutionStatus) -> Result<bool> {
        kill_on_worker(rt, final_state).await
    }

    async fn savepoint(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        let Some(host) = rt.task.host.clone().filter(|h| !h.is_empty()) else {
            warn!("stream task has no worker, savepoint skipped");
            return Ok(false);
        };
        let command = Command::new(
            CommandType::TaskSavepointRequest,
            rt.ctx.host().clone(),
            &TaskSavepointRequest {
                task_instance_id: rt.task.id,
            },
        )?;
        rt.ctx.retry.send_tracked(rt.task.id, &host, command).await;
        info!(host = %host, "savepoint requested");
        Ok(true)
    }
}
