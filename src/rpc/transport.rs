use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use crate::error::SchedulerError;
use crate::model::Host;
use crate::rpc::command::Command;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Point-to-point message channel between cluster members.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_host(&self) -> &Host;

    /// Delivers a command to another member's inbox.
    async fn send(&self, to: &Host, command: &Command) -> Result<()>;

    /// Next command from this member's inbox, `None` when nothing arrived in time.
    async fn recv(&self) -> Result<Option<Command>>;
}

/// A cluster living in one process.
#[derive(Default)]
pub struct InMemoryNetwork {
    inboxes: DashMap<Host, mpsc::UnboundedSender<Command>>,
    down: DashSet<Host>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `host` and returns its endpoint. Joining again replaces the previous inbox.
    pub fn join(self: &Arc<Self>, host: Host) -> InMemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(host.clone(), tx);
        InMemoryTransport {
            host,
            network: Arc::clone(self),
            receiver: Mutex::new(rx),
        }
    }

    /// Simulates a host that stopped answering.
    pub fn set_down(&self, host: &Host, down: bool) {
        if down {
            self.down.insert(host.clone());
        } else {
            self.down.remove(host);
        }
    }

    fn deliver(&self, to: &Host, command: &Command) -> Result<()> {
        if self.down.contains(to) {
            return Err(SchedulerError::Unreachable(to.to_string()).into());
        }
        let inbox = self
            .inboxes
            .get(to)
            .ok_or_else(|| SchedulerError::Unreachable(to.to_string()))?;
        inbox
            .send(command.clone())
            .map_err(|_| SchedulerError::Unreachable(to.to_string()))?;
        Ok(())
    }
}

pub struct InMemoryTransport {
    host: Host,
    network: Arc<InMemoryNetwork>,
    receiver: Mutex<mpsc::UnboundedReceiver<Command>>,
}

impl InMemoryTransport {
    /// Non-blocking read of the inbox.
    pub async fn try_recv(&self) -> Option<Command> {
        self.receiver.lock().await.try_recv().ok()
    }

    /// Drains everything currently in the inbox.
    pub async fn drain(&self) -> Vec<Command> {
        let mut rx = self.receiver.lock().await;
        let mut commands = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            commands.push(cmd);
        }
        commands
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_host(&self) -> &Host {
        &self.host
    }

    async fn send(&self, to: &Host, command: &Command) -> Result<()> {
        self.network.deliver(to, command)
    }

    async fn recv(&self) -> Result<Option<Command>> {
        let mut rx = self.receiver.lock().await;
        match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
            Ok(Some(cmd)) => Ok(Some(cmd)),
            Ok(None) => Err(anyhow!("Inbox of {} closed", self.host)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::command::{CommandType, TaskKillRequest};

    #[tokio::test]
    async fn delivers_to_named_inbox() {
        let network = InMemoryNetwork::new();
        let master = network.join(Host::new("m:1"));
        let worker = network.join(Host::new("w:1"));

        let cmd = Command::new(
            CommandType::TaskKillRequest,
            master.local_host().clone(),
            &TaskKillRequest { task_instance_id: 1 },
        )
        .unwrap();
        master.send(&Host::new("w:1"), &cmd).await.unwrap();
        assert_eq!(worker.recv().await.unwrap(), Some(cmd.clone()));

        network.set_down(&Host::new("w:1"), true);
        assert!(master.send(&Host::new("w:1"), &cmd).await.is_err());
        assert!(master.send(&Host::new("nobody:1"), &cmd).await.is_err());
    }
}
