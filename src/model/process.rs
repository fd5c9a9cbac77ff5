use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};

use crate::model::property::Property;
use crate::model::state::{Priority, WorkflowExecutionStatus};
use crate::model::task::Host;

/// How a workflow run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Scheduler,
    #[default]
    Manual,
}

/// One run of a workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub id: i64,
    pub process_definition_code: i64,
    pub process_definition_version: i32,
    pub project_code: i64,
    pub state: WorkflowExecutionStatus,
    pub schedule_time: Option<NaiveDateTime>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub trigger: TriggerType,
    #[serde(default)]
    pub global_params: Vec<Property>,
    #[serde(default)]
    pub var_pool: Vec<Property>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub test_flag: bool,
    #[serde(default)]
    pub blocked: bool,
    /// Master currently owning this run.
    #[serde(default)]
    pub host: Option<Host>,
    #[serde(default)]
    pub tenant_code: Option<String>,
}

impl ProcessInstance {
    pub fn new(id: i64, process_definition_code: i64, project_code: i64) -> Self {
        Self {
            id,
            process_definition_code,
            process_definition_version: 1,
            project_code,
            state: WorkflowExecutionStatus::RunningExecution,
            schedule_time: None,
            start_time: None,
            end_time: None,
            trigger: TriggerType::Manual,
            global_params: Vec::new(),
            var_pool: Vec::new(),
            priority: Priority::Medium,
            test_flag: false,
            blocked: false,
            host: None,
            tenant_code: None,
        }
    }

    /// Date dependency intervals are computed from.
    pub fn business_date(&self) -> Option<NaiveDateTime> {
        self.schedule_time.or(self.start_time)
    }
}

/// Minimal view of a workflow definition, enough to validate dependency references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinitionRef {
    pub code: i64,
    pub project_code: i64,
    pub name: String,
    #[serde(default)]
    pub task_codes: Vec<i64>,
    /// Tasks without successors; their OUT variables are what a parent sub-process sees.
    #[serde(default)]
    pub end_task_codes: Vec<i64>,
}
