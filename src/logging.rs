use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::model::{TaskExecutionContext, TaskInstance};

/// Installs the fmt subscriber. `RUST_LOG` wins over the default level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Span carrying the ids of a task instance on the master.
pub fn task_span(task: &TaskInstance) -> Span {
    tracing::info_span!(
        "task",
        task_instance_id = task.id,
        process_instance_id = task.process_instance_id,
        task_type = %task.task_type,
    )
}

/// Span carrying the ids of a task being executed on a worker.
pub fn execution_span(ctx: &TaskExecutionContext) -> Span {
    tracing::info_span!(
        "task",
        task_instance_id = ctx.task_instance_id,
        process_instance_id = ctx.process_instance_id,
        task_type = %ctx.task_type,
    )
}
