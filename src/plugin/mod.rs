use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::model::{Property, TaskExecutionContext, TaskExecutionStatus};

pub mod http;
pub mod shell;

/// External things a task needs resolved before it can be dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub datasource_ids: Vec<i64>,
    pub udf_ids: Vec<i32>,
    pub resource_names: Vec<String>,
    pub dq_rule_id: Option<i32>,
}

/// Parsed, type-specific parameters of a task.
pub trait TaskParameters: Send + Sync + Debug {
    fn check_parameters(&self) -> bool;

    fn resource_requirements(&self) -> ResourceRequirements {
        ResourceRequirements::default()
    }
}

/// Final report of a plugin run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskExecutionStatus,
    pub exit_code: i32,
    pub app_ids: Option<String>,
    pub var_pool: Vec<Property>,
}

impl TaskOutcome {
    pub fn success(var_pool: Vec<Property>) -> Self {
        Self {
            status: TaskExecutionStatus::Success,
            exit_code: 0,
            app_ids: None,
            var_pool,
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            status: TaskExecutionStatus::Failure,
            exit_code,
            app_ids: None,
            var_pool: Vec::new(),
        }
    }

    pub fn killed() -> Self {
        Self {
            status: TaskExecutionStatus::Kill,
            exit_code: 137,
            app_ids: None,
            var_pool: Vec::new(),
        }
    }
}

/// Progress a running plugin reports back to the worker.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn update_process_id(&self, process_id: u32);
    async fn update_app_ids(&self, app_ids: &str);
}

/// One runnable instance of a task.
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    async fn handle(&self, callback: &dyn TaskCallback) -> Result<TaskOutcome>;

    async fn cancel(&self) -> Result<()>;

    /// Asks a streaming task to take a savepoint. `Ok(false)` when unsupported.
    async fn savepoint(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Factory for one task type.
pub trait TaskChannel: Send + Sync {
    fn task_type(&self) -> &str;

    fn parse_parameters(&self, task_params: &Value) -> Result<Box<dyn TaskParameters>>;

    fn create_task(&self, ctx: &TaskExecutionContext) -> Result<Arc<dyn ExecutableTask>>;
}

/// Task types the process knows how to run, by upper-case type name.
#[derive(Default)]
pub struct TaskPluginRegistry {
    channels: HashMap<String, Arc<dyn TaskChannel>>,
}

impl TaskPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in SHELL and HTTP plugins.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(shell::ShellTaskChannel));
        registry.register(Arc::new(http::HttpTaskChannel::new()));
        registry
    }

    pub fn register(&mut self, channel: Arc<dyn TaskChannel>) {
        self.channels
            .insert(channel.task_type().to_uppercase(), channel);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskChannel>> {
        self.channels.get(&task_type.to_uppercase()).cloned()
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.channels.keys().cloned().collect();
        types.sort();
        types
    }
}
