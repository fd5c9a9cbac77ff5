use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::dependency::date::DateInterval;
use crate::model::context::{DataSourceParams, UdfFunction};
use crate::model::{ProcessDefinitionRef, ProcessInstance, TaskInstance};

/// Persistence seen by the scheduler.
///
/// Every query that looks at execution history takes the test flag so test runs and
/// production runs never see each other.
#[async_trait]
pub trait ProcessService: Send + Sync {
    /// Persists a task instance for `process` and returns the stored copy (id assigned).
    async fn submit_task(&self, process: &ProcessInstance, task: &TaskInstance) -> Result<TaskInstance>;

    async fn update_task_instance(&self, task: &TaskInstance) -> Result<()>;

    async fn find_task_instance_by_id(&self, id: i64) -> Result<Option<TaskInstance>>;

    /// Task instances of a run that are not shadowed by a later retry attempt.
    async fn find_valid_task_list_by_process_id(
        &self,
        process_instance_id: i64,
        test_flag: bool,
    ) -> Result<Vec<TaskInstance>>;

    async fn find_process_instance_by_id(&self, id: i64) -> Result<Option<ProcessInstance>>;

    async fn update_process_instance(&self, process: &ProcessInstance) -> Result<()>;

    /// Child run started by a sub-process task instance.
    async fn find_sub_process_instance(
        &self,
        parent_process_instance_id: i64,
        parent_task_instance_id: i64,
    ) -> Result<Option<ProcessInstance>>;

    /// Valid task instances of the end nodes of a run.
    async fn find_end_task_instances(&self, process_instance_id: i64) -> Result<Vec<TaskInstance>>;

    async fn find_last_running_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>>;

    async fn find_last_scheduler_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>>;

    async fn find_last_manual_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>>;

    async fn find_process_definition(&self, code: i64) -> Result<Option<ProcessDefinitionRef>>;

    async fn find_data_source(&self, id: i64) -> Result<Option<DataSourceParams>>;

    async fn find_udfs(&self, ids: &[i32]) -> Result<Vec<UdfFunction>>;

    /// Tenant owning a resource, by full resource name.
    async fn query_resource_owner(&self, full_name: &str) -> Result<Option<String>>;

    async fn get_tenant_code(&self, process: &ProcessInstance) -> Result<Option<String>>;

    /// Resolved rule inputs of a data-quality rule.
    async fn get_dq_rule_inputs(&self, rule_id: i32) -> Result<Option<BTreeMap<String, String>>>;
}
