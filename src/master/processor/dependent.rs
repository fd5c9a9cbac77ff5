use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info};

use crate::dependency::DependencyEvaluator;
use crate::dependency::date::date_intervals;
use crate::error::SchedulerError;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::dependent::{DependTarget, DependentParameters};
use crate::model::params::{self, DEPENDENCE};
use crate::model::{DependResult, ProcessorKind, TaskExecutionStatus};

/// Waits for runs of other workflows, polled on every `Run`.
pub struct DependentBehavior {
    evaluator: Option<DependencyEvaluator>,
}

impl DependentBehavior {
    pub fn new() -> Self {
        Self { evaluator: None }
    }
}

impl Default for DependentBehavior {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that every item points at an existing project, workflow and task.
async fn validate(rt: &TaskRuntime, dependence: &DependentParameters) -> Result<()> {
    let now = Local::now().naive_local();
    for model in &dependence.depend_task_list {
        for item in &model.depend_item_list {
            let definition = rt
                .ctx
                .process_service
                .find_process_definition(item.definition_code)
                .await?
                .ok_or_else(|| {
                    SchedulerError::definition(format!(
                        "dependent workflow {} does not exist",
                        item.definition_code
                    ))
                })?;
            if definition.project_code != item.project_code {
                return Err(SchedulerError::definition(format!(
                    "dependent workflow {} is not in project {}",
                    item.definition_code, item.project_code
                ))
                .into());
            }
            if let DependTarget::Task(code) = item.dep_task_code {
                if !definition.task_codes.contains(&code) {
                    return Err(SchedulerError::definition(format!(
                        "dependent task {} does not exist in workflow {}",
                        code, item.definition_code
                    ))
                    .into());
                }
            }
            date_intervals(now, &item.cycle, &item.date_value)?;
        }
    }
    Ok(())
}

#[async_trait]
impl TaskBehavior for DependentBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Dependent
    }

    async fn submit(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        if !rt.submit_with_retry().await? {
            return Ok(false);
        }
        rt.start_on_master().await?;
        let dependence: DependentParameters = params::section(&rt.task.task_params, DEPENDENCE)?;
        validate(rt, &dependence).await?;
        self.evaluator = Some(DependencyEvaluator::new(dependence));
        Ok(true)
    }

    async fn run(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        if self.evaluator.is_none() {
            let dependence: DependentParameters = params::section(&rt.task.task_params, DEPENDENCE)?;
            self.evaluator = Some(DependencyEvaluator::new(dependence));
        }
        let Some(evaluator) = self.evaluator.as_mut() else {
            return Ok(false);
        };

        let business_date = rt
            .process
            .business_date()
            .unwrap_or_else(|| Local::now().naive_local());
        let result = evaluator
            .evaluate(rt.ctx.process_service.as_ref(), business_date, rt.process.test_flag)
            .await?;
        match result {
            DependResult::Waiting => {
                debug!("dependence still waiting");
            }
            DependResult::Success => {
                info!("dependence satisfied");
                rt.finish(TaskExecutionStatus::Success).await?;
            }
            DependResult::Failed => {
                info!("dependence failed");
                rt.finish(TaskExecutionStatus::Failure).await?;
            }
        }
        Ok(true)
    }

    async fn pause(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        rt.finish(TaskExecutionStatus::Pause).await?;
        Ok(true)
    }
}
