use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::TaskExecutionStatus;
use crate::rpc::command::{
    Command, CommandType, TaskAck, TaskDispatchRequest, TaskKillRequest, TaskKillResponse,
    TaskSavepointRequest, TaskSavepointResponse, WorkflowHostChangeRequest,
    WorkflowHostChangeResponse,
};
use crate::rpc::router::{CommandProcessor, CommandRouter};
use crate::worker::os;
use crate::worker::pool::WorkerExecutePool;
use crate::worker::runnable::WorkerTaskExecuteRunnable;
use crate::worker::WorkerContext;

pub struct TaskDispatchProcessor {
    pub worker: Arc<WorkerContext>,
    pub pool: Arc<WorkerExecutePool>,
}

#[async_trait]
impl CommandProcessor for TaskDispatchProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskDispatchRequest
    }

    async fn process(&self, command: Command) -> Result<()> {
        let request: TaskDispatchRequest = command.body()?;
        let mut context = request.context;
        let id = context.task_instance_id;
        let sender = &self.worker.sender;

        if self.worker.cache.contains(id) {
            // resent request, the first copy already got the task
            return sender.send_dispatch_response(&command.source, id, true, None).await;
        }
        if !self.worker.config.groups.contains(&context.worker_group) {
            let message = format!("worker is not in group {}", context.worker_group);
            warn!(task_instance_id = id, worker_group = %context.worker_group, "dispatch to wrong group");
            return sender
                .send_dispatch_response(&command.source, id, false, Some(message))
                .await;
        }

        context.host = Some(sender.local_host().clone());
        self.worker.cache.put(context.clone());
        let runnable = WorkerTaskExecuteRunnable::new(Arc::clone(&self.worker), context);
        if !self.pool.submit(runnable) {
            self.worker.cache.remove(id);
            warn!(task_instance_id = id, "execution pool full, task rejected");
            return sender
                .send_dispatch_response(&command.source, id, false, Some("worker pool is full".to_string()))
                .await;
        }
        info!(task_instance_id = id, "task accepted");
        sender.send_dispatch_response(&command.source, id, true, None).await
    }
}

pub struct TaskKillProcessor {
    pub worker: Arc<WorkerContext>,
    pub pool: Arc<WorkerExecutePool>,
}

#[async_trait]
impl CommandProcessor for TaskKillProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskKillRequest
    }

    async fn process(&self, command: Command) -> Result<()> {
        let request: TaskKillRequest = command.body()?;
        let id = request.task_instance_id;
        let mut response = TaskKillResponse {
            task_instance_id: id,
            status: TaskExecutionStatus::Kill,
            host: self.worker.sender.local_host().clone(),
            process_id: 0,
            app_ids: Vec::new(),
        };

        if self.pool.kill_pending(id) {
            self.worker.cache.remove(id);
        } else if let Some(ctx) = self.worker.cache.context(id) {
            if let Some(task) = self.worker.cache.cancel(id) {
                if let Err(e) = task.cancel().await {
                    warn!(task_instance_id = id, error = %e, "plugin cancel failed");
                }
            }
            if ctx.process_id != 0 {
                if let Err(e) = os::kill_process_group(ctx.process_id).await {
                    warn!(task_instance_id = id, pid = ctx.process_id, error = %e, "kill failed");
                }
            }
            let app_ids = os::parse_app_ids(ctx.app_ids.as_deref());
            os::kill_applications(&app_ids).await;
            response.process_id = ctx.process_id;
            response.app_ids = app_ids;
        } else {
            info!(task_instance_id = id, "kill for unknown task, nothing to do");
        }

        info!(task_instance_id = id, pid = response.process_id, "task killed");
        self.worker
            .sender
            .send_kill_response(&command.source, &response)
            .await
    }
}

pub struct TaskSavepointProcessor {
    pub worker: Arc<WorkerContext>,
}

#[async_trait]
impl CommandProcessor for TaskSavepointProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::TaskSavepointRequest
    }

    async fn process(&self, command: Command) -> Result<()> {
        let request: TaskSavepointRequest = command.body()?;
        let id = request.task_instance_id;
        let response = match self.worker.cache.executable(id) {
            Some(task) => match task.savepoint().await {
                Ok(true) => TaskSavepointResponse {
                    task_instance_id: id,
                    success: true,
                    message: None,
                },
                Ok(false) => TaskSavepointResponse {
                    task_instance_id: id,
                    success: false,
                    message: Some("task type does not support savepoints".to_string()),
                },
                Err(e) => TaskSavepointResponse {
                    task_instance_id: id,
                    success: false,
                    message: Some(e.to_string()),
                },
            },
            None => TaskSavepointResponse {
                task_instance_id: id,
                success: false,
                message: Some("task is not running here".to_string()),
            },
        };
        self.worker
            .sender
            .send_savepoint_response(&command.source, &response)
            .await
    }
}

pub struct WorkflowHostChangeProcessor {
    pub worker: Arc<WorkerContext>,
}

#[async_trait]
impl CommandProcessor for WorkflowHostChangeProcessor {
    fn command_type(&self) -> CommandType {
        CommandType::WorkflowHostChangeRequest
    }

    async fn process(&self, command: Command) -> Result<()> {
        let request: WorkflowHostChangeRequest = command.body()?;
        let id = request.task_instance_id;
        let updated = self
            .worker
            .cache
            .update(id, |c| c.workflow_instance_host = request.workflow_host.clone())
            .is_some();
        if updated {
            self.worker
                .sender
                .retry()
                .update_host(id, &request.workflow_host);
            info!(task_instance_id = id, master = %request.workflow_host, "workflow host changed");
        } else {
            warn!(task_instance_id = id, "host change for unknown task");
        }
        self.worker
            .sender
            .send_host_change_response(
                &command.source,
                &WorkflowHostChangeResponse {
                    task_instance_id: id,
                    success: updated,
                },
            )
            .await
    }
}

/// Handles both execute acks.
pub struct TaskAckProcessor {
    pub worker: Arc<WorkerContext>,
    pub ack_type: CommandType,
}

#[async_trait]
impl CommandProcessor for TaskAckProcessor {
    fn command_type(&self) -> CommandType {
        self.ack_type
    }

    async fn process(&self, command: Command) -> Result<()> {
        let ack: TaskAck = command.body()?;
        let Some(acknowledged) = self.ack_type.acknowledges() else {
            return Ok(());
        };
        self.worker.sender.retry().ack(ack.task_instance_id, acknowledged);
        if !ack.success {
            warn!(task_instance_id = ack.task_instance_id, command_type = %acknowledged, "master could not apply report");
        }
        if acknowledged == CommandType::TaskExecuteResult {
            self.worker.cache.remove(ack.task_instance_id);
        }
        Ok(())
    }
}

/// Router with every command a worker answers to.
pub fn worker_router(worker: Arc<WorkerContext>, pool: Arc<WorkerExecutePool>) -> CommandRouter {
    let mut router = CommandRouter::new();
    router.register(Arc::new(TaskDispatchProcessor {
        worker: Arc::clone(&worker),
        pool: Arc::clone(&pool),
    }));
    router.register(Arc::new(TaskKillProcessor {
        worker: Arc::clone(&worker),
        pool,
    }));
    router.register(Arc::new(TaskSavepointProcessor {
        worker: Arc::clone(&worker),
    }));
    router.register(Arc::new(WorkflowHostChangeProcessor {
        worker: Arc::clone(&worker),
    }));
    router.register(Arc::new(TaskAckProcessor {
        worker: Arc::clone(&worker),
        ack_type: CommandType::TaskExecuteRunningAck,
    }));
    router.register(Arc::new(TaskAckProcessor {
        worker,
        ack_type: CommandType::TaskExecuteResultAck,
    }));
    router
}
