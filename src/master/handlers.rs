use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::master::dispatch::TaskDispatcher;
use crate::master::scheduler::TaskScheduler;
use crate::rpc::command::{
    Command, CommandType, TaskAck, TaskDispatchResponse, TaskExecuteResult, TaskExecuteRunning,
    TaskKillResponse, TaskSavepointResponse, WorkflowHostChangeResponse, WorkflowStateEventChange,
};
use crate::rpc::retry::MessageRetryRunner;
use crate::rpc::router::{CommandProcessor, CommandRouter};

async fn send_ack(retry: &MessageRetryRunner, to: &Command, ack_type: CommandType, ack: TaskAck) -> Result<()> {
    let command = Command::new(ack_type, retry.local_host().clone(), &ack)?;
    retry.send_untracked(&to.source, &command).await
}

pub struct TaskDispatchResponseProcessor {
    pub retry: Arc<MessageRetryRunner>,
    pub dispatcher: Arc<TaskDispatcher>,
}

#[async_trait]
impl CommandProcessor for TaskDispatchResponseProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskDispatchResponse
    }

    async fn process(&self, command: Command) -> Result<()> {
        let response: TaskDispatchResponse = command.body()?;
        self.retry
            .ack(response.task_instance_id, CommandType::TaskDispatchRequest);
        if response.accepted {
            self.dispatcher.accepted(response.task_instance_id);
            Ok(())
        } else {
            self.dispatcher
                .rejected(response.task_instance_id, &command.source)
                .await
        }
    }
}

pub struct TaskExecuteRunningProcessor {
    pub retry: Arc<MessageRetryRunner>,
    pub scheduler: Arc<TaskScheduler>,
}

#[async_trait]
impl CommandProcessor for TaskExecuteRunningProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskExecuteRunning
    }

    async fn process(&self, command: Command) -> Result<()> {
        let report: TaskExecuteRunning = command.body()?;
        let applied = self.scheduler.on_running(&report).await;
        if let Err(e) = &applied {
            warn!(task_instance_id = report.task_instance_id, error = %e, "running report not applied");
        }
        send_ack(
            &self.retry,
            &command,
            CommandType::TaskExecuteRunningAck,
            TaskAck {
                task_instance_id: report.task_instance_id,
                success: applied.is_ok(),
            },
        )
        .await
    }
}

pub struct TaskExecuteResultProcessor {
    pub retry: Arc<MessageRetryRunner>,
    pub scheduler: Arc<TaskScheduler>,
}

#[async_trait]
impl CommandProcessor for TaskExecuteResultProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskExecuteResult
    }

    async fn process(&self, command: Command) -> Result<()> {
        let report: TaskExecuteResult = command.body()?;
        let applied = self.scheduler.on_result(&report).await;
        if let Err(e) = &applied {
            warn!(task_instance_id = report.task_instance_id, error = %e, "result not applied");
        }
        send_ack(
            &self.retry,
            &command,
            CommandType::TaskExecuteResultAck,
            TaskAck {
                task_instance_id: report.task_instance_id,
                success: applied.is_ok(),
            },
        )
        .await
    }
}

pub struct TaskKillResponseProcessor {
    pub retry: Arc<MessageRetryRunner>,
}

#[async_trait]
impl CommandProcessor for TaskKillResponseProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskKillResponse
    }

    async fn process(&self, command: Command) -> Result<()> {
        let response: TaskKillResponse = command.body()?;
        self.retry
            .ack(response.task_instance_id, CommandType::TaskKillRequest);
        info!(
            task_instance_id = response.task_instance_id,
            host = %response.host,
            status = %response.status,
            app_ids = ?response.app_ids,
            "worker confirmed kill"
        );
        Ok(())
    }
}

pub struct TaskSavepointResponseProcessor {
    pub retry: Arc<MessageRetryRunner>,
}

#[async_trait]
impl CommandProcessor for TaskSavepointResponseProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskSavepointResponse
    }

    async fn process(&self, command: Command) -> Result<()> {
        let response: TaskSavepointResponse = command.body()?;
        self.retry
            .ack(response.task_instance_id, CommandType::TaskSavepointRequest);
        if response.success {
            info!(task_instance_id = response.task_instance_id, "savepoint taken");
        } else {
            warn!(task_instance_id = response.task_instance_id, message = ?response.message, "savepoint not taken");
        }
        Ok(())
    }
}

pub struct WorkflowHostChangeResponseProcessor {
    pub retry: Arc<MessageRetryRunner>,
}

#[async_trait]
impl CommandProcessor for WorkflowHostChangeResponseProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::WorkflowHostChangeResponse
    }

    async fn process(&self, command: Command) -> Result<()> {
        let response: WorkflowHostChangeResponse = command.body()?;
        self.retry
            .ack(response.task_instance_id, CommandType::WorkflowHostChangeRequest);
        Ok(())
    }
}

pub struct WorkflowStateEventChangeProcessor {
    pub scheduler: Arc<TaskScheduler>,
}

#[async_trait]
impl CommandProcessor for WorkflowStateEventChangeProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::WorkflowStateEventChange
    }

    async fn process(&self, command: Command) -> Result<()> {
        let event: WorkflowStateEventChange = command.body()?;
        self.scheduler.on_workflow_state_event(&event).await
    }
}

/// Router with every command a master answers to.
pub fn master_router(scheduler: Arc<TaskScheduler>, dispatcher: Arc<TaskDispatcher>) -> CommandRouter {
    let retry = Arc::clone(&scheduler.context().retry);
    let mut router = CommandRouter::new();
    router.register(Arc::new(TaskDispatchResponseProcessor {
        retry: Arc::clone(&retry),
        dispatcher,
    }));
    router.register(Arc::new(TaskExecuteRunningProcessor {
        retry: Arc::clone(&retry),
        scheduler: Arc::clone(&scheduler),
    }));
    router.register(Arc::new(TaskExecuteResultProcessor {
        retry: Arc::clone(&retry),
        scheduler: Arc::clone(&scheduler),
    }));
    router.register(Arc::new(TaskKillResponseProcessor {
        retry: Arc::clone(&retry),
    }));
    router.register(Arc::new(TaskSavepointResponseProcessor {
        retry: Arc::clone(&retry),
    }));
    router.register(Arc::new(WorkflowHostChangeResponseProcessor { retry }));
    router.register(Arc::new(WorkflowStateEventChangeProcessor { scheduler }));
    router
}
