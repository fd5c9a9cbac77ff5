use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::fmt;

use crate::model::property::Property;
use crate::model::state::{Priority, TaskExecutionStatus};

/// Address of a master or worker, `ip:port` style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Host(pub String);

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task type tag. Built-in logic types are evaluated on the master, everything else is a
/// plugin type executed on a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Conditions,
    Dependent,
    Switch,
    Blocking,
    SubProcess,
    FlinkStream,
    Plugin(String),
}

impl TaskType {
    pub fn name(&self) -> &str {
        match self {
            TaskType::Conditions => "CONDITIONS",
            TaskType::Dependent => "DEPENDENT",
            TaskType::Switch => "SWITCH",
            TaskType::Blocking => "BLOCKING",
            TaskType::SubProcess => "SUB_PROCESS",
            TaskType::FlinkStream => "FLINK_STREAM",
            TaskType::Plugin(name) => name,
        }
    }

    pub fn processor_kind(&self) -> ProcessorKind {
        match self {
            TaskType::Conditions => ProcessorKind::Condition,
            TaskType::Dependent => ProcessorKind::Dependent,
            TaskType::Switch => ProcessorKind::Switch,
            TaskType::Blocking => ProcessorKind::Blocking,
            TaskType::SubProcess => ProcessorKind::SubProcess,
            TaskType::FlinkStream => ProcessorKind::Stream,
            TaskType::Plugin(_) => ProcessorKind::Common,
        }
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "CONDITIONS" => TaskType::Conditions,
            "DEPENDENT" => TaskType::Dependent,
            "SWITCH" => TaskType::Switch,
            "BLOCKING" => TaskType::Blocking,
            "SUB_PROCESS" => TaskType::SubProcess,
            "FLINK_STREAM" => TaskType::FlinkStream,
            upper => TaskType::Plugin(upper.to_string()),
        }
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        TaskType::from(value.to_string())
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which processor variant drives a task type on the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Common,
    Condition,
    Dependent,
    Switch,
    Blocking,
    SubProcess,
    Stream,
}

impl ProcessorKind {
    /// Kinds that are handed to a worker.
    pub fn is_dispatched(self) -> bool {
        matches!(self, ProcessorKind::Common | ProcessorKind::Stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskTimeoutStrategy {
    #[default]
    Warn,
    Failed,
    WarnFailed,
}

impl TaskTimeoutStrategy {
    pub fn alerts(self) -> bool {
        matches!(self, Self::Warn | Self::WarnFailed)
    }

    pub fn fails(self) -> bool {
        matches!(self, Self::Failed | Self::WarnFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskTimeout {
    pub enabled: bool,
    pub strategy: TaskTimeoutStrategy,
    /// Minutes.
    pub minutes: u32,
}

/// One attempt of a DAG node in a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    pub id: i64,
    pub name: String,
    pub task_code: i64,
    pub task_definition_version: i32,
    pub task_type: TaskType,
    pub state: TaskExecutionStatus,
    #[serde(default)]
    pub host: Option<Host>,
    pub first_submit_time: Option<NaiveDateTime>,
    pub submit_time: Option<NaiveDateTime>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub retry_times: u32,
    #[serde(default)]
    pub max_retry_times: u32,
    #[serde(default)]
    pub var_pool: Vec<Property>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub execute_path: Option<String>,
    #[serde(default)]
    pub app_ids: Option<String>,
    #[serde(default)]
    pub process_id: u32,
    pub process_instance_id: i64,
    #[serde(default)]
    pub task_params: Value,
    #[serde(default)]
    pub task_priority: Priority,
    #[serde(default)]
    pub task_group_priority: i32,
    #[serde(default = "default_worker_group")]
    pub worker_group: String,
    /// Minutes to wait after first submission before the worker may start the task.
    #[serde(default)]
    pub delay_time: u32,
    #[serde(default)]
    pub timeout: TaskTimeout,
    #[serde(default)]
    pub environment_config: Option<String>,
    /// False once a later retry attempt shadows this one.
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default)]
    pub test_flag: bool,
}

fn default_worker_group() -> String {
    "default".to_string()
}

fn default_valid() -> bool {
    true
}

impl TaskInstance {
    pub fn new(id: i64, task_code: i64, task_type: TaskType, process_instance_id: i64) -> Self {
        Self {
            id,
            name: format!("task-{}", task_code),
            task_code,
            task_definition_version: 1,
            task_type,
            state: TaskExecutionStatus::SubmittedSuccess,
            host: None,
            first_submit_time: None,
            submit_time: None,
            start_time: None,
            end_time: None,
            retry_times: 0,
            max_retry_times: 0,
            var_pool: Vec::new(),
            log_path: None,
            execute_path: None,
            app_ids: None,
            process_id: 0,
            process_instance_id,
            task_params: Value::Null,
            task_priority: Priority::Medium,
            task_group_priority: 0,
            worker_group: default_worker_group(),
            delay_time: 0,
            timeout: TaskTimeout::default(),
            environment_config: None,
            valid: true,
            test_flag: false,
        }
    }

    pub fn with_params(mut self, task_params: Value) -> Self {
        self.task_params = task_params;
        self
    }

    pub fn processor_kind(&self) -> ProcessorKind {
        self.task_type.processor_kind()
    }

    pub fn has_host(&self) -> bool {
        self.host.as_ref().is_some_and(|h| !h.is_empty())
    }
}
