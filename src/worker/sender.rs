use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{Host, TaskExecutionContext};
use crate::rpc::command::{
    Command, CommandType, TaskDispatchResponse, TaskExecuteResult, TaskExecuteRunning,
    TaskKillResponse, TaskSavepointResponse, WorkflowHostChangeResponse,
};
use crate::rpc::retry::MessageRetryRunner;

/// Builds and sends every message a worker emits.
///
/// Status reports go to the context's workflow host and stay in the retry table until the
/// master acks them. Responses are sent once to whoever asked.
pub struct WorkerMessageSender {
    retry: Arc<MessageRetryRunner>,
}

impl WorkerMessageSender {
    pub fn new(retry: Arc<MessageRetryRunner>) -> Self {
        Self { retry }
    }

    pub fn retry(&self) -> &Arc<MessageRetryRunner> {
        &self.retry
    }

    pub fn local_host(&self) -> &Host {
        self.retry.local_host()
    }

    /// RUNNING_EXECUTION or DELAY_EXECUTION, whatever the context currently says.
    pub async fn send_running(&self, ctx: &TaskExecutionContext) -> Result<()> {
        let report = TaskExecuteRunning {
            task_instance_id: ctx.task_instance_id,
            process_instance_id: ctx.process_instance_id,
            status: ctx.current_execution_status,
            host: self.local_host().clone(),
            start_time: ctx.start_time,
            execute_path: ctx.execute_path.clone(),
            log_path: ctx.log_path.clone(),
            process_id: ctx.process_id,
            app_ids: ctx.app_ids.clone(),
        };
        let command = Command::new(CommandType::TaskExecuteRunning, self.local_host().clone(), &report)?;
        self.retry
            .send_tracked(ctx.task_instance_id, &ctx.workflow_instance_host, command)
            .await;
        debug!(task_instance_id = ctx.task_instance_id, status = %ctx.current_execution_status, "running report sent");
        Ok(())
    }

    pub async fn send_result(&self, ctx: &TaskExecutionContext) -> Result<()> {
        let report = TaskExecuteResult {
            task_instance_id: ctx.task_instance_id,
            process_instance_id: ctx.process_instance_id,
            status: ctx.current_execution_status,
            host: self.local_host().clone(),
            start_time: ctx.start_time,
            end_time: ctx.end_time,
            execute_path: ctx.execute_path.clone(),
            process_id: ctx.process_id,
            app_ids: ctx.app_ids.clone(),
            var_pool: ctx.var_pool.clone(),
        };
        let command = Command::new(CommandType::TaskExecuteResult, self.local_host().clone(), &report)?;
        // a result supersedes any running report still waiting for its ack
        self.retry
            .ack(ctx.task_instance_id, CommandType::TaskExecuteRunning);
        self.retry
            .send_tracked(ctx.task_instance_id, &ctx.workflow_instance_host, command)
            .await;
        debug!(task_instance_id = ctx.task_instance_id, status = %ctx.current_execution_status, "result sent");
        Ok(())
    }

    pub async fn send_dispatch_response(
        &self,
        to: &Host,
        task_instance_id: i64,
        accepted: bool,
        message: Option<String>,
    ) -> Result<()> {
        self.respond(
            to,
            CommandType::TaskDispatchResponse,
            &TaskDispatchResponse {
                task_instance_id,
                accepted,
                message,
            },
        )
        .await
    }

    pub async fn send_kill_response(&self, to: &Host, response: &TaskKillResponse) -> Result<()> {
        self.respond(to, CommandType::TaskKillResponse, response).await
    }

    pub async fn send_savepoint_response(&self, to: &Host, response: &TaskSavepointResponse) -> Result<()> {
        self.respond(to, CommandType::TaskSavepointResponse, response).await
    }

    pub async fn send_host_change_response(
        &self,
        to: &Host,
        response: &WorkflowHostChangeResponse,
    ) -> Result<()> {
        self.respond(to, CommandType::WorkflowHostChangeResponse, response).await
    }

    async fn respond<T: serde::Serialize>(&self, to: &Host, command_type: CommandType, body: &T) -> Result<()> {
        let command = Command::new(command_type, self.local_host().clone(), body)?;
        if let Err(e) = self.retry.send_untracked(to, &command).await {
            warn!(command_type = %command_type, host = %to, error = %e, "response not delivered");
            return Err(e);
        }
        Ok(())
    }
}
