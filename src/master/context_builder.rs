use anyhow::Result;
use std::collections::BTreeMap;

use crate::error::SchedulerError;
use crate::expression::var_pool::param_map;
use crate::master::processor::TaskRuntime;
use crate::model::{Direct, TaskExecutionContext};

/// Resolves everything a worker needs to run the task.
///
/// Anything that cannot be resolved is a definition error: the task would never succeed.
pub async fn build_execution_context(rt: &TaskRuntime) -> Result<TaskExecutionContext> {
    let task = &rt.task;
    let process = &rt.process;
    let service = rt.ctx.process_service.as_ref();

    let channel = rt.ctx.plugins.get(task.task_type.name()).ok_or_else(|| {
        SchedulerError::definition(format!("no plugin for task type {}", task.task_type))
    })?;
    let parameters = channel
        .parse_parameters(&task.task_params)
        .map_err(|e| SchedulerError::definition(format!("invalid task params: {:#}", e)))?;
    if !parameters.check_parameters() {
        return Err(SchedulerError::definition(format!(
            "task params of {} failed validation",
            task.name
        ))
        .into());
    }
    let requirements = parameters.resource_requirements();

    let mut datasources = Vec::with_capacity(requirements.datasource_ids.len());
    for id in &requirements.datasource_ids {
        let datasource = service
            .find_data_source(*id)
            .await?
            .ok_or_else(|| SchedulerError::definition(format!("datasource {} not found", id)))?;
        datasources.push(datasource);
    }

    let udf_functions = if requirements.udf_ids.is_empty() {
        Vec::new()
    } else {
        let udfs = service.find_udfs(&requirements.udf_ids).await?;
        if let Some(missing) = requirements
            .udf_ids
            .iter()
            .find(|id| !udfs.iter().any(|u| u.id == **id))
        {
            return Err(SchedulerError::definition(format!("udf {} not found", missing)).into());
        }
        udfs
    };

    let mut resources = BTreeMap::new();
    for name in &requirements.resource_names {
        let owner = service
            .query_resource_owner(name)
            .await?
            .ok_or_else(|| SchedulerError::definition(format!("resource {} not found", name)))?;
        resources.insert(name.clone(), owner);
    }

    let data_quality_params = match requirements.dq_rule_id {
        Some(rule_id) => service
            .get_dq_rule_inputs(rule_id)
            .await?
            .ok_or_else(|| SchedulerError::definition(format!("data quality rule {} not found", rule_id)))?,
        None => BTreeMap::new(),
    };

    let tenant_code = service
        .get_tenant_code(process)
        .await?
        .ok_or_else(|| SchedulerError::definition(format!("no tenant for workflow run {}", process.id)))?;

    let mut prepare_params: BTreeMap<_, _> = param_map(&process.global_params, &process.var_pool)
        .into_iter()
        .collect();
    for p in task.var_pool.iter().filter(|p| p.direct == Direct::In) {
        prepare_params.insert(p.prop.clone(), p.clone());
    }

    Ok(TaskExecutionContext {
        task_instance_id: task.id,
        task_name: task.name.clone(),
        task_code: task.task_code,
        task_type: task.task_type.clone(),
        task_params: task.task_params.clone(),
        process_instance_id: process.id,
        process_define_code: process.process_definition_code,
        process_define_version: process.process_definition_version,
        project_code: process.project_code,
        first_submit_time: task.first_submit_time,
        start_time: task.start_time,
        end_time: None,
        delay_time: task.delay_time,
        tenant_code,
        worker_group: task.worker_group.clone(),
        host: None,
        workflow_instance_host: rt.ctx.host().clone(),
        execute_path: None,
        log_path: task.log_path.clone(),
        var_pool: task.var_pool.clone(),
        prepare_params,
        current_execution_status: task.state,
        process_id: 0,
        app_ids: task.app_ids.clone(),
        timeout: task.timeout,
        environment_config: task.environment_config.clone(),
        datasources,
        udf_functions,
        resources,
        data_quality_params,
        test_flag: task.test_flag,
    })
}
