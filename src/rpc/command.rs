use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::model::{Host, Property, TaskExecutionContext, TaskExecutionStatus, WorkflowExecutionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    TaskDispatchRequest,
    TaskDispatchResponse,
    TaskExecuteRunning,
    TaskExecuteRunningAck,
    TaskExecuteResult,
    TaskExecuteResultAck,
    TaskKillRequest,
    TaskKillResponse,
    TaskSavepointRequest,
    TaskSavepointResponse,
    WorkflowHostChangeRequest,
    WorkflowHostChangeResponse,
    WorkflowStateEventChange,
}

impl CommandType {
    /// The command type acknowledged by this one, if it is an acknowledgement.
    pub fn acknowledges(self) -> Option<CommandType> {
        match self {
            Self::TaskDispatchResponse => Some(Self::TaskDispatchRequest),
            Self::TaskExecuteRunningAck => Some(Self::TaskExecuteRunning),
            Self::TaskExecuteResultAck => Some(Self::TaskExecuteResult),
            Self::TaskKillResponse => Some(Self::TaskKillRequest),
            Self::TaskSavepointResponse => Some(Self::TaskSavepointRequest),
            Self::WorkflowHostChangeResponse => Some(Self::WorkflowHostChangeRequest),
            _ => None,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Wire envelope shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub opaque: Uuid,
    pub command_type: CommandType,
    pub source: Host,
    pub body: Value,
}

impl Command {
    pub fn new<T: Serialize>(command_type: CommandType, source: Host, body: &T) -> Result<Self> {
        Ok(Self {
            opaque: Uuid::new_v4(),
            command_type,
            source,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .with_context(|| format!("Malformed {} body", self.command_type))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatchRequest {
    pub context: TaskExecutionContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatchResponse {
    pub task_instance_id: i64,
    pub accepted: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecuteRunning {
    pub task_instance_id: i64,
    pub process_instance_id: i64,
    pub status: TaskExecutionStatus,
    pub host: Host,
    pub start_time: Option<NaiveDateTime>,
    pub execute_path: Option<String>,
    pub log_path: Option<String>,
    pub process_id: u32,
    pub app_ids: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecuteResult {
    pub task_instance_id: i64,
    pub process_instance_id: i64,
    pub status: TaskExecutionStatus,
    pub host: Host,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub execute_path: Option<String>,
    pub process_id: u32,
    pub app_ids: Option<String>,
    #[serde(default)]
    pub var_pool: Vec<Property>,
}

/// Body of both execute acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAck {
    pub task_instance_id: i64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKillRequest {
    pub task_instance_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKillResponse {
    pub task_instance_id: i64,
    pub status: TaskExecutionStatus,
    pub host: Host,
    pub process_id: u32,
    #[serde(default)]
    pub app_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSavepointRequest {
    pub task_instance_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSavepointResponse {
    pub task_instance_id: i64,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHostChangeRequest {
    pub task_instance_id: i64,
    pub workflow_host: Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHostChangeResponse {
    pub task_instance_id: i64,
    pub success: bool,
}

/// Asks the master owning a workflow run to move it to `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateEventChange {
    pub process_instance_id: i64,
    pub task_instance_id: i64,
    pub state: WorkflowExecutionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_pairs() {
        assert_eq!(
            CommandType::TaskExecuteResultAck.acknowledges(),
            Some(CommandType::TaskExecuteResult)
        );
        assert_eq!(CommandType::TaskExecuteResult.acknowledges(), None);
    }

    #[test]
    fn envelope_carries_typed_body() {
        let cmd = Command::new(
            CommandType::TaskKillRequest,
            Host::new("m:1"),
            &TaskKillRequest { task_instance_id: 9 },
        )
        .unwrap();
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("TASK_KILL_REQUEST"));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body::<TaskKillRequest>().unwrap().task_instance_id, 9);
        assert!(back.body::<TaskAck>().is_err());
    }
}
