pub mod cache;
pub mod handlers;
pub mod os;
pub mod pool;
pub mod runnable;
pub mod sender;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::plugin::TaskPluginRegistry;
use crate::rpc::command::CommandType;
use crate::rpc::retry::{ExhaustedMessage, MessageRetryRunner, RetryPolicy};
use crate::rpc::router::CommandRouter;
use crate::rpc::transport::Transport;
use crate::service::storage::StorageOperate;

pub use cache::TaskExecutionContextCache;
pub use pool::WorkerExecutePool;
pub use runnable::WorkerTaskExecuteRunnable;
pub use sender::WorkerMessageSender;

/// Shared state of a worker, handed to every runnable and request handler.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub plugins: Arc<TaskPluginRegistry>,
    pub storage: Arc<dyn StorageOperate>,
    pub cache: TaskExecutionContextCache,
    pub sender: WorkerMessageSender,
}

/// A worker process: context, execution pool and the router answering the masters.
pub struct Worker {
    pub context: Arc<WorkerContext>,
    pub pool: Arc<WorkerExecutePool>,
    pub retry: Arc<MessageRetryRunner>,
    exhausted: Option<mpsc::UnboundedReceiver<ExhaustedMessage>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        plugins: Arc<TaskPluginRegistry>,
        storage: Arc<dyn StorageOperate>,
    ) -> Self {
        let (retry, exhausted) = MessageRetryRunner::new(transport, RetryPolicy::from(&config.retry));
        let retry = Arc::new(retry);
        let pool = Arc::new(WorkerExecutePool::new(config.exec_threads, config.task_queue_size));
        let context = Arc::new(WorkerContext {
            config,
            plugins,
            storage,
            cache: TaskExecutionContextCache::new(),
            sender: WorkerMessageSender::new(Arc::clone(&retry)),
        });
        Self {
            context,
            pool,
            retry,
            exhausted: Some(exhausted),
        }
    }

    pub fn router(&self) -> CommandRouter {
        handlers::worker_router(Arc::clone(&self.context), Arc::clone(&self.pool))
    }

    /// Receiver of reports the masters never acked. Can be taken once.
    pub fn take_exhausted(&mut self) -> Option<mpsc::UnboundedReceiver<ExhaustedMessage>> {
        self.exhausted.take()
    }

    /// Serves commands and resends reports until `shutdown` flips to true.
    pub async fn run(mut self, transport: Arc<dyn Transport>, shutdown: watch::Receiver<bool>) {
        let router = Arc::new(self.router());
        let tick = self.context.config.retry.tick_interval();
        let retry = tokio::spawn(Arc::clone(&self.retry).run(tick, shutdown.clone()));
        let watcher = self
            .take_exhausted()
            .map(|rx| tokio::spawn(watch_exhausted(Arc::clone(&self.context), rx)));

        router.serve(transport, shutdown).await;
        if let Err(e) = retry.await {
            warn!(error = %e, "retry runner ended abnormally");
        }
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!(running = self.pool.running(), queued = self.pool.len(), "worker stopped");
    }
}

/// Drops cached contexts whose result never reached a master.
pub async fn watch_exhausted(worker: Arc<WorkerContext>, mut rx: mpsc::UnboundedReceiver<ExhaustedMessage>) {
    while let Some(message) = rx.recv().await {
        match message.command_type {
            CommandType::TaskExecuteResult => {
                error!(
                    task_instance_id = message.task_instance_id,
                    master = %message.destination,
                    attempts = message.attempts,
                    "result never acked, dropping task context"
                );
                worker.cache.remove(message.task_instance_id);
            }
            other => warn!(
                task_instance_id = message.task_instance_id,
                command_type = %other,
                master = %message.destination,
                "report never acked"
            ),
        }
    }
}
