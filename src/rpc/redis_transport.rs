use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;

use crate::model::Host;
use crate::rpc::command::Command;
use crate::rpc::transport::Transport;

/// Each member owns a Redis list used as its inbox.
pub struct RedisTransport {
    client: redis::Client,
    host: Host,
    inbox_key: String,
}

impl RedisTransport {
    pub fn new(client: redis::Client, host: Host) -> Self {
        let inbox_key = Self::inbox_of(&host);
        Self {
            client,
            host,
            inbox_key,
        }
    }

    fn inbox_of(host: &Host) -> String {
        format!("dagflow:inbox:{}", host)
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn local_host(&self) -> &Host {
        &self.host
    }

    async fn send(&self, to: &Host, command: &Command) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(command)?;
        let _: () = conn.lpush(Self::inbox_of(to), serialized).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Command>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // 1s timeout keeps the serve loop responsive to shutdown.
        let result: Option<(String, String)> = conn.brpop(&self.inbox_key, 1.0).await?;

        if let Some((_, command_json)) = result {
            Ok(Some(serde_json::from_str(&command_json)?))
        } else {
            Ok(None)
        }
    }
}
