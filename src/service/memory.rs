use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use crate::dependency::date::DateInterval;
use crate::error::SchedulerError;
use crate::model::context::{DataSourceParams, UdfFunction};
use crate::model::{ProcessDefinitionRef, ProcessInstance, TaskInstance, TriggerType};
use crate::service::process::ProcessService;

/// `ProcessService` kept in process memory. Backs local mode and the tests.
pub struct InMemoryProcessService {
    tasks: DashMap<i64, TaskInstance>,
    processes: DashMap<i64, ProcessInstance>,
    // (parent process instance, parent task instance) -> child process instance
    sub_processes: DashMap<(i64, i64), i64>,
    definitions: DashMap<i64, ProcessDefinitionRef>,
    datasources: DashMap<i64, DataSourceParams>,
    udfs: DashMap<i32, UdfFunction>,
    resource_owners: DashMap<String, String>,
    dq_rules: DashMap<i32, BTreeMap<String, String>>,
    next_task_id: AtomicI64,
    failing_submits: AtomicUsize,
    submit_calls: AtomicUsize,
}

impl InMemoryProcessService {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            processes: DashMap::new(),
            sub_processes: DashMap::new(),
            definitions: DashMap::new(),
            datasources: DashMap::new(),
            udfs: DashMap::new(),
            resource_owners: DashMap::new(),
            dq_rules: DashMap::new(),
            next_task_id: AtomicI64::new(1),
            failing_submits: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        }
    }

    pub fn insert_process(&self, process: ProcessInstance) {
        self.processes.insert(process.id, process);
    }

    pub fn insert_task(&self, task: TaskInstance) {
        self.next_task_id.fetch_max(task.id + 1, Ordering::SeqCst);
        self.tasks.insert(task.id, task);
    }

    pub fn insert_definition(&self, definition: ProcessDefinitionRef) {
        self.definitions.insert(definition.code, definition);
    }

    pub fn insert_data_source(&self, datasource: DataSourceParams) {
        self.datasources.insert(datasource.id, datasource);
    }

    pub fn insert_udf(&self, udf: UdfFunction) {
        self.udfs.insert(udf.id, udf);
    }

    pub fn insert_resource_owner(&self, full_name: impl Into<String>, tenant: impl Into<String>) {
        self.resource_owners.insert(full_name.into(), tenant.into());
    }

    pub fn insert_dq_rule(&self, rule_id: i32, inputs: BTreeMap<String, String>) {
        self.dq_rules.insert(rule_id, inputs);
    }

    pub fn link_sub_process(&self, parent_process_id: i64, parent_task_id: i64, child_process_id: i64) {
        self.sub_processes
            .insert((parent_process_id, parent_task_id), child_process_id);
    }

    /// Makes the next `n` calls to `submit_task` fail with a transient error.
    pub fn fail_next_submits(&self, n: usize) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn task(&self, id: i64) -> Option<TaskInstance> {
        self.tasks.get(&id).map(|t| t.value().clone())
    }

    pub fn process(&self, id: i64) -> Option<ProcessInstance> {
        self.processes.get(&id).map(|p| p.value().clone())
    }

    fn latest_by<F, K>(&self, filter: F, key: K) -> Option<ProcessInstance>
    where
        F: Fn(&ProcessInstance) -> bool,
        K: Fn(&ProcessInstance) -> Option<chrono::NaiveDateTime>,
    {
        self.processes
            .iter()
            .filter(|p| filter(p.value()))
            .max_by_key(|p| (key(p.value()), p.id))
            .map(|p| p.value().clone())
    }
}

impl Default for InMemoryProcessService {
    fn default() -> Self {
        Self::new()
    }
}

fn in_interval(t: Option<chrono::NaiveDateTime>, interval: &DateInterval) -> bool {
    t.is_some_and(|t| interval.contains(t))
}

#[async_trait]
impl ProcessService for InMemoryProcessService {
    async fn submit_task(&self, process: &ProcessInstance, task: &TaskInstance) -> Result<TaskInstance> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SchedulerError::transient("task instance store unavailable").into());
        }

        let mut stored = task.clone();
        if stored.id == 0 {
            stored.id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        }
        stored.process_instance_id = process.id;
        stored.test_flag = process.test_flag;
        self.tasks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_task_instance(&self, task: &TaskInstance) -> Result<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_task_instance_by_id(&self, id: i64) -> Result<Option<TaskInstance>> {
        Ok(self.task(id))
    }

    async fn find_valid_task_list_by_process_id(
        &self,
        process_instance_id: i64,
        test_flag: bool,
    ) -> Result<Vec<TaskInstance>> {
        let mut tasks: Vec<TaskInstance> = self
            .tasks
            .iter()
            .filter(|t| t.process_instance_id == process_instance_id && t.valid && t.test_flag == test_flag)
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn find_process_instance_by_id(&self, id: i64) -> Result<Option<ProcessInstance>> {
        Ok(self.process(id))
    }

    async fn update_process_instance(&self, process: &ProcessInstance) -> Result<()> {
        self.processes.insert(process.id, process.clone());
        Ok(())
    }

    async fn find_sub_process_instance(
        &self,
        parent_process_instance_id: i64,
        parent_task_instance_id: i64,
    ) -> Result<Option<ProcessInstance>> {
        let child = self
            .sub_processes
            .get(&(parent_process_instance_id, parent_task_instance_id))
            .map(|id| *id.value());
        Ok(child.and_then(|id| self.process(id)))
    }

    async fn find_end_task_instances(&self, process_instance_id: i64) -> Result<Vec<TaskInstance>> {
        let Some(process) = self.process(process_instance_id) else {
            return Ok(Vec::new());
        };
        let end_codes = self
            .definitions
            .get(&process.process_definition_code)
            .map(|d| d.end_task_codes.clone())
            .unwrap_or_default();
        let tasks = self
            .find_valid_task_list_by_process_id(process_instance_id, process.test_flag)
            .await?;
        Ok(tasks
            .into_iter()
            .filter(|t| end_codes.is_empty() || end_codes.contains(&t.task_code))
            .collect())
    }

    async fn find_last_running_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>> {
        Ok(self.latest_by(
            |p| {
                p.process_definition_code == definition_code
                    && p.test_flag == test_flag
                    && !p.state.is_finished()
                    && in_interval(p.business_date(), interval)
            },
            |p| p.start_time,
        ))
    }

    async fn find_last_scheduler_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>> {
        Ok(self.latest_by(
            |p| {
                p.process_definition_code == definition_code
                    && p.test_flag == test_flag
                    && p.trigger == TriggerType::Scheduler
                    && in_interval(p.schedule_time, interval)
            },
            |p| p.end_time,
        ))
    }

    async fn find_last_manual_process(
        &self,
        definition_code: i64,
        interval: &DateInterval,
        test_flag: bool,
    ) -> Result<Option<ProcessInstance>> {
        Ok(self.latest_by(
            |p| {
                p.process_definition_code == definition_code
                    && p.test_flag == test_flag
                    && p.trigger == TriggerType::Manual
                    && in_interval(p.start_time, interval)
            },
            |p| p.end_time,
        ))
    }

    async fn find_process_definition(&self, code: i64) -> Result<Option<ProcessDefinitionRef>> {
        Ok(self.definitions.get(&code).map(|d| d.value().clone()))
    }

    async fn find_data_source(&self, id: i64) -> Result<Option<DataSourceParams>> {
        Ok(self.datasources.get(&id).map(|d| d.value().clone()))
    }

    async fn find_udfs(&self, ids: &[i32]) -> Result<Vec<UdfFunction>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.udfs.get(id).map(|u| u.value().clone()))
            .collect())
    }

    async fn query_resource_owner(&self, full_name: &str) -> Result<Option<String>> {
        Ok(self.resource_owners.get(full_name).map(|t| t.value().clone()))
    }

    async fn get_tenant_code(&self, process: &ProcessInstance) -> Result<Option<String>> {
        Ok(process.tenant_code.clone())
    }

    async fn get_dq_rule_inputs(&self, rule_id: i32) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.dq_rules.get(&rule_id).map(|r| r.value().clone()))
    }
}
