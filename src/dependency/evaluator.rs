use anyhow::Result;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::dependency::date::{DateInterval, date_intervals};
use crate::dependency::relation::{reduce, short_circuits};
use crate::model::dependent::{DependTarget, DependentItem, DependentParameters, DependentTaskModel};
use crate::model::{DependResult, ProcessInstance, TaskExecutionStatus};
use crate::service::process::ProcessService;

/// Evaluates one dependent model, remembering terminal results between polls.
pub struct DependentExecute {
    model: DependentTaskModel,
    item_results: HashMap<String, DependResult>,
    model_result: Option<DependResult>,
}

impl DependentExecute {
    pub fn new(model: DependentTaskModel) -> Self {
        Self {
            model,
            item_results: HashMap::new(),
            model_result: None,
        }
    }

    pub fn model(&self) -> &DependentTaskModel {
        &self.model
    }

    /// Terminal results seen so far, by item key.
    pub fn item_results(&self) -> &HashMap<String, DependResult> {
        &self.item_results
    }

    pub async fn evaluate(
        &mut self,
        service: &dyn ProcessService,
        business_date: NaiveDateTime,
        test_flag: bool,
    ) -> Result<DependResult> {
        if let Some(result) = self.model_result {
            return Ok(result);
        }

        let relation = self.model.relation;
        let mut results = Vec::with_capacity(self.model.depend_item_list.len());
        for item in &self.model.depend_item_list {
            let key = item.key();
            let result = match self.item_results.get(&key) {
                Some(cached) => *cached,
                None => {
                    let result = evaluate_item(item, service, business_date, test_flag).await?;
                    if result.is_terminal() {
                        self.item_results.insert(key.clone(), result);
                    }
                    result
                }
            };
            debug!(item = %key, result = ?result, "dependent item evaluated");
            results.push(result);
            if short_circuits(relation, result) {
                break;
            }
        }

        let result = reduce(relation, &results);
        if result.is_terminal() {
            self.model_result = Some(result);
        }
        Ok(result)
    }
}

/// Poll-driven evaluator of a whole dependence tree.
///
/// Once an item, a model or the tree reached SUCCESS or FAILED it is never recomputed.
pub struct DependencyEvaluator {
    parameters: DependentParameters,
    models: Vec<DependentExecute>,
    result: Option<DependResult>,
}

impl DependencyEvaluator {
    pub fn new(parameters: DependentParameters) -> Self {
        let models = parameters
            .depend_task_list
            .iter()
            .cloned()
            .map(DependentExecute::new)
            .collect();
        Self {
            parameters,
            models,
            result: None,
        }
    }

    pub fn parameters(&self) -> &DependentParameters {
        &self.parameters
    }

    pub fn models(&self) -> &[DependentExecute] {
        &self.models
    }

    pub async fn evaluate(
        &mut self,
        service: &dyn ProcessService,
        business_date: NaiveDateTime,
        test_flag: bool,
    ) -> Result<DependResult> {
        if let Some(result) = self.result {
            return Ok(result);
        }

        let relation = self.parameters.relation;
        let mut results = Vec::with_capacity(self.models.len());
        for model in &mut self.models {
            let result = model.evaluate(service, business_date, test_flag).await?;
            results.push(result);
            if short_circuits(relation, result) {
                break;
            }
        }

        let result = reduce(relation, &results);
        if result.is_terminal() {
            info!(result = ?result, "dependence resolved");
            self.result = Some(result);
        }
        Ok(result)
    }
}

async fn evaluate_item(
    item: &DependentItem,
    service: &dyn ProcessService,
    business_date: NaiveDateTime,
    test_flag: bool,
) -> Result<DependResult> {
    let intervals = date_intervals(business_date, &item.cycle, &item.date_value)?;

    let mut result = DependResult::Failed;
    for interval in &intervals {
        let Some(process) = last_process_in(service, item.definition_code, interval, test_flag).await? else {
            debug!(
                definition_code = item.definition_code,
                start = %interval.start,
                end = %interval.end,
                "no workflow run in interval"
            );
            return Ok(DependResult::Waiting);
        };

        result = match item.dep_task_code {
            DependTarget::AllTasks => result_of_process(&process),
            DependTarget::Task(code) => result_of_task(service, &process, code, test_flag).await?,
        };
        if result != DependResult::Success {
            break;
        }
    }
    Ok(result)
}

/// The run a dependency should look at: a running one first, else the later-ending of the
/// last scheduled and the last manual run.
async fn last_process_in(
    service: &dyn ProcessService,
    definition_code: i64,
    interval: &DateInterval,
    test_flag: bool,
) -> Result<Option<ProcessInstance>> {
    if let Some(running) = service
        .find_last_running_process(definition_code, interval, test_flag)
        .await?
    {
        return Ok(Some(running));
    }
    let scheduled = service
        .find_last_scheduler_process(definition_code, interval, test_flag)
        .await?;
    let manual = service
        .find_last_manual_process(definition_code, interval, test_flag)
        .await?;
    Ok(match (scheduled, manual) {
        (Some(s), Some(m)) => {
            if m.end_time > s.end_time {
                Some(m)
            } else {
                Some(s)
            }
        }
        (s, m) => s.or(m),
    })
}

fn result_of_process(process: &ProcessInstance) -> DependResult {
    if !process.state.is_finished() {
        DependResult::Waiting
    } else if process.state.is_success() {
        DependResult::Success
    } else {
        DependResult::Failed
    }
}

async fn result_of_task(
    service: &dyn ProcessService,
    process: &ProcessInstance,
    task_code: i64,
    test_flag: bool,
) -> Result<DependResult> {
    let tasks = service
        .find_valid_task_list_by_process_id(process.id, test_flag)
        .await?;
    let Some(task) = tasks.iter().find(|t| t.task_code == task_code) else {
        return Ok(if process.state.is_finished() {
            DependResult::Failed
        } else {
            DependResult::Waiting
        });
    };
    Ok(result_of_task_state(task.state))
}

pub(crate) fn result_of_task_state(state: TaskExecutionStatus) -> DependResult {
    if !state.is_finished() {
        DependResult::Waiting
    } else if state.is_success() {
        DependResult::Success
    } else {
        DependResult::Failed
    }
}
