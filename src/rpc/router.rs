use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::rpc::command::{Command, CommandType};
use crate::rpc::transport::Transport;

/// Handles one command type.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    fn command_type(&self) -> CommandType;
    async fn process(&self, command: Command) -> Result<()>;
}

/// Routes inbound commands to their processors.
#[derive(Default)]
pub struct CommandRouter {
    processors: HashMap<CommandType, Arc<dyn CommandProcessor>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn CommandProcessor>) {
        self.processors.insert(processor.command_type(), processor);
    }

    pub fn handles(&self, command_type: CommandType) -> bool {
        self.processors.contains_key(&command_type)
    }

    pub async fn dispatch(&self, command: Command) -> Result<()> {
        let Some(processor) = self.processors.get(&command.command_type) else {
            warn!(command_type = %command.command_type, source = %command.source, "no processor for command");
            return Ok(());
        };
        debug!(command_type = %command.command_type, opaque = %command.opaque, source = %command.source, "command received");
        processor.process(command).await
    }

    /// Reads the transport inbox until `shutdown` flips to true.
    ///
    /// Commands are handled one at a time so reports from one sender keep their order.
    pub async fn serve(self: Arc<Self>, transport: Arc<dyn Transport>, mut shutdown: watch::Receiver<bool>) {
        info!(host = %transport.local_host(), "command server started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = transport.recv() => match received {
                    Ok(Some(command)) => {
                        let command_type = command.command_type;
                        if let Err(e) = self.dispatch(command).await {
                            error!(command_type = %command_type, error = ?e, "command processing failed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "transport receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!(host = %transport.local_host(), "command server stopped");
    }
}
