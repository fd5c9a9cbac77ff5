use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::property::Property;
use crate::model::state::TaskExecutionStatus;
use crate::model::task::{Host, TaskTimeout, TaskType};

/// Connection parameters of a datasource referenced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceParams {
    pub id: i64,
    pub kind: String,
    pub connection_params: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdfFunction {
    pub id: i32,
    pub func_name: String,
    pub class_name: String,
    pub resource_name: String,
}

/// Everything a worker needs to run one task, fully resolved by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionContext {
    pub task_instance_id: i64,
    pub task_name: String,
    pub task_code: i64,
    pub task_type: TaskType,
    pub task_params: Value,
    pub process_instance_id: i64,
    pub process_define_code: i64,
    pub process_define_version: i32,
    pub project_code: i64,
    pub first_submit_time: Option<NaiveDateTime>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    /// Minutes.
    pub delay_time: u32,
    pub tenant_code: String,
    pub worker_group: String,
    /// Worker the task was dispatched to.
    pub host: Option<Host>,
    /// Master owning the workflow; status reports go here.
    pub workflow_instance_host: Host,
    pub execute_path: Option<String>,
    pub log_path: Option<String>,
    #[serde(default)]
    pub var_pool: Vec<Property>,
    #[serde(default)]
    pub prepare_params: BTreeMap<String, Property>,
    pub current_execution_status: TaskExecutionStatus,
    #[serde(default)]
    pub process_id: u32,
    #[serde(default)]
    pub app_ids: Option<String>,
    #[serde(default)]
    pub timeout: TaskTimeout,
    #[serde(default)]
    pub environment_config: Option<String>,
    #[serde(default)]
    pub datasources: Vec<DataSourceParams>,
    #[serde(default)]
    pub udf_functions: Vec<UdfFunction>,
    /// Resource full name -> owning tenant.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub data_quality_params: BTreeMap<String, String>,
    #[serde(default)]
    pub test_flag: bool,
}
