use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

use crate::model::{Property, TaskExecutionContext};
use crate::plugin::{ExecutableTask, TaskCallback, TaskChannel, TaskOutcome, TaskParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpCheckCondition {
    /// 200 is success.
    #[default]
    StatusCodeDefault,
    /// `condition` holds the expected status code.
    StatusCodeCustom,
    BodyContains,
    BodyNotContains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpParameters {
    pub url: String,
    pub http_method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub http_check_condition: HttpCheckCondition,
    pub condition: String,
    pub timeout_ms: u64,
}

impl Default for HttpParameters {
    fn default() -> Self {
        Self {
            url: String::new(),
            http_method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            http_check_condition: HttpCheckCondition::StatusCodeDefault,
            condition: String::new(),
            timeout_ms: 60_000,
        }
    }
}

impl HttpParameters {
    fn passes(&self, status: u16, body: &str) -> bool {
        match self.http_check_condition {
            HttpCheckCondition::StatusCodeDefault => status == 200,
            HttpCheckCondition::StatusCodeCustom => {
                self.condition.trim().parse::<u16>().is_ok_and(|expected| expected == status)
            }
            HttpCheckCondition::BodyContains => body.contains(&self.condition),
            HttpCheckCondition::BodyNotContains => !body.contains(&self.condition),
        }
    }
}

impl TaskParameters for HttpParameters {
    fn check_parameters(&self) -> bool {
        !self.url.trim().is_empty() && self.http_method.parse::<reqwest::Method>().is_ok()
    }
}

pub struct HttpTaskChannel {
    client: Client,
}

impl HttpTaskChannel {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTaskChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskChannel for HttpTaskChannel {
    fn task_type(&self) -> &str {
        "HTTP"
    }

    fn parse_parameters(&self, task_params: &Value) -> Result<Box<dyn TaskParameters>> {
        let params: HttpParameters =
            serde_json::from_value(task_params.clone()).context("Invalid HTTP parameters")?;
        Ok(Box::new(params))
    }

    fn create_task(&self, ctx: &TaskExecutionContext) -> Result<Arc<dyn ExecutableTask>> {
        let params: HttpParameters =
            serde_json::from_value(ctx.task_params.clone()).context("Invalid HTTP parameters")?;
        Ok(Arc::new(HttpTask {
            client: self.client.clone(),
            task_instance_id: ctx.task_instance_id,
            params,
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        }))
    }
}

/// Calls a URL and checks the answer. The body is published as the OUT variable `response`.
pub struct HttpTask {
    client: Client,
    task_instance_id: i64,
    params: HttpParameters,
    cancelled: AtomicBool,
    cancel_signal: Notify,
}

impl HttpTask {
    async fn call(&self) -> Result<(u16, String)> {
        let method = self
            .params
            .http_method
            .parse::<reqwest::Method>()
            .map_err(|_| anyhow!("Invalid HTTP method: {}", self.params.http_method))?;

        let mut builder = self
            .client
            .request(method, &self.params.url)
            .timeout(Duration::from_millis(self.params.timeout_ms));
        if let Some(body) = &self.params.body {
            builder = builder.json(body);
        }
        for (k, v) in &self.params.headers {
            builder = builder.header(k, v);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl ExecutableTask for HttpTask {
    async fn handle(&self, _callback: &dyn TaskCallback) -> Result<TaskOutcome> {
        let (status, body) = tokio::select! {
            answer = self.call() => answer?,
            _ = self.cancel_signal.notified() => return Ok(TaskOutcome::killed()),
        };
        info!(task_instance_id = self.task_instance_id, url = %self.params.url, status, "http task answered");

        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(TaskOutcome::killed());
        }
        if self.params.passes(status, &body) {
            Ok(TaskOutcome::success(vec![Property::output("response", body)]))
        } else {
            Ok(TaskOutcome::failure(i32::from(status)))
        }
    }

    async fn cancel(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_signal.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_conditions() {
        let mut params = HttpParameters::default();
        assert!(params.passes(200, ""));
        assert!(!params.passes(500, ""));

        params.http_check_condition = HttpCheckCondition::StatusCodeCustom;
        params.condition = "201".to_string();
        assert!(params.passes(201, ""));

        params.http_check_condition = HttpCheckCondition::BodyContains;
        params.condition = "ok".to_string();
        assert!(params.passes(500, "status ok"));
        params.http_check_condition = HttpCheckCondition::BodyNotContains;
        assert!(!params.passes(200, "status ok"));
    }

    #[test]
    fn url_is_required() {
        let channel = HttpTaskChannel::new();
        assert!(!channel.parse_parameters(&json!({})).unwrap().check_parameters());
        assert!(
            channel
                .parse_parameters(&json!({"url": "http://localhost/x", "httpMethod": "POST"}))
                .unwrap()
                .check_parameters()
        );
    }
}
