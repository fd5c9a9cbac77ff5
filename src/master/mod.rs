use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::MasterConfig;
use crate::model::Host;
use crate::plugin::TaskPluginRegistry;
use crate::rpc::retry::{ExhaustedMessage, MessageRetryRunner, RetryPolicy};
use crate::rpc::router::CommandRouter;
use crate::rpc::transport::Transport;
use crate::service::alert::AlertClientService;
use crate::service::process::ProcessService;
use crate::service::registry::WorkerRegistry;

pub mod context_builder;
pub mod dispatch;
pub mod handlers;
pub mod priority;
pub mod processor;
pub mod scheduler;

pub use dispatch::TaskDispatcher;
pub use priority::{PriorityDispatchQueue, TaskPriority};
pub use processor::{TaskAction, TaskProcessor, TaskProcessorFactory};
pub use scheduler::TaskScheduler;

/// Services shared by every task processor of a master.
pub struct MasterContext {
    pub config: MasterConfig,
    pub process_service: Arc<dyn ProcessService>,
    pub alert: Arc<dyn AlertClientService>,
    pub plugins: Arc<TaskPluginRegistry>,
    pub queue: Arc<PriorityDispatchQueue>,
    pub retry: Arc<MessageRetryRunner>,
}

impl MasterContext {
    /// Address workers report back to.
    pub fn host(&self) -> &Host {
        self.retry.local_host()
    }
}

/// A master process: scheduler, dispatcher and the router answering the workers.
pub struct Master {
    pub scheduler: Arc<TaskScheduler>,
    pub dispatcher: Arc<TaskDispatcher>,
    exhausted: Option<mpsc::UnboundedReceiver<ExhaustedMessage>>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        transport: Arc<dyn Transport>,
        process_service: Arc<dyn ProcessService>,
        alert: Arc<dyn AlertClientService>,
        plugins: Arc<TaskPluginRegistry>,
        registry: Arc<dyn WorkerRegistry>,
    ) -> Self {
        let (retry, exhausted) = MessageRetryRunner::new(transport, RetryPolicy::from(&config.retry));
        let queue = Arc::new(PriorityDispatchQueue::new(config.dispatch_queue_capacity));
        let ctx = Arc::new(MasterContext {
            config,
            process_service,
            alert,
            plugins,
            queue,
            retry: Arc::new(retry),
        });
        let scheduler = Arc::new(TaskScheduler::new(ctx, TaskProcessorFactory::with_defaults()));
        let dispatcher = Arc::new(TaskDispatcher::new(Arc::clone(&scheduler), registry));
        Self {
            scheduler,
            dispatcher,
            exhausted: Some(exhausted),
        }
    }

    pub fn context(&self) -> &Arc<MasterContext> {
        self.scheduler.context()
    }

    pub fn router(&self) -> CommandRouter {
        handlers::master_router(Arc::clone(&self.scheduler), Arc::clone(&self.dispatcher))
    }

    /// Receiver of commands no worker ever answered. Can be taken once.
    pub fn take_exhausted(&mut self) -> Option<mpsc::UnboundedReceiver<ExhaustedMessage>> {
        self.exhausted.take()
    }

    /// Runs every master loop until `shutdown` flips to true.
    pub async fn run(mut self, transport: Arc<dyn Transport>, shutdown: watch::Receiver<bool>) {
        let router = Arc::new(self.router());
        let retry = Arc::clone(&self.context().retry);
        let tick = self.context().config.retry.tick_interval();

        let loops = vec![
            tokio::spawn(retry.run(tick, shutdown.clone())),
            tokio::spawn(Arc::clone(&self.scheduler).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.dispatcher).run(shutdown.clone())),
        ];
        let watcher = self.take_exhausted().map(|rx| {
            tokio::spawn(Arc::clone(&self.scheduler).watch_exhausted(rx, Arc::clone(&self.dispatcher)))
        });

        router.serve(transport, shutdown).await;
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "master loop ended abnormally");
            }
        }
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!(active_tasks = self.scheduler.len(), "master stopped");
    }
}
