use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    TaskTimeout,
    TaskFailure,
    ProcessBlocked,
    DefinitionError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub content: Value,
    pub process_instance_id: i64,
    pub task_instance_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl Alert {
    pub fn new(kind: AlertKind, title: impl Into<String>, content: Value, process_instance_id: i64) -> Self {
        Self {
            kind,
            title: title.into(),
            content,
            process_instance_id,
            task_instance_id: None,
            created_at: Local::now().naive_local(),
        }
    }

    pub fn for_task(mut self, task_instance_id: i64) -> Self {
        self.task_instance_id = Some(task_instance_id);
        self
    }
}

#[async_trait]
pub trait AlertClientService: Send + Sync {
    async fn send_alert(&self, alert: Alert) -> Result<()>;
}

/// Sends an alert and swallows delivery failures; alerts never change scheduling state.
pub async fn raise(client: &dyn AlertClientService, alert: Alert) {
    let kind = alert.kind;
    if let Err(e) = client.send_alert(alert).await {
        warn!(kind = ?kind, error = %e, "alert delivery failed");
    }
}

/// Posts alerts as JSON to a webhook.
pub struct HttpAlertClient {
    client: Client,
    webhook: String,
}

impl HttpAlertClient {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            webhook: webhook.into(),
        }
    }
}

#[async_trait]
impl AlertClientService for HttpAlertClient {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        let response = self.client.post(&self.webhook).json(&alert).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Alert webhook answered {}", response.status()));
        }
        Ok(())
    }
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogAlertClient;

#[async_trait]
impl AlertClientService for LogAlertClient {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        info!(
            kind = ?alert.kind,
            process_instance_id = alert.process_instance_id,
            task_instance_id = ?alert.task_instance_id,
            title = %alert.title,
            "alert"
        );
        Ok(())
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertClient {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

#[async_trait]
impl AlertClientService for RecordingAlertClient {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        self.alerts
            .lock()
            .map_err(|_| anyhow!("alert log poisoned"))?
            .push(alert);
        Ok(())
    }
}
