use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::dependency::evaluator::result_of_task_state;
use crate::dependency::relation::reduce;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::dependent::{DependTarget, DependentItem, DependentParameters};
use crate::model::params::{self, CONDITION_RESULT, ConditionResult, DEPENDENCE};
use crate::model::{DependResult, ProcessorKind, TaskExecutionStatus, TaskInstance};

/// Routes the workflow to `successNode` or `failedNode` depending on upstream task states.
pub struct ConditionBehavior;

fn item_result(item: &DependentItem, siblings: &[TaskInstance]) -> DependResult {
    let DependTarget::Task(code) = item.dep_task_code else {
        return DependResult::Failed;
    };
    let Some(task) = siblings.iter().find(|t| t.task_code == code) else {
        return DependResult::Failed;
    };
    if !task.state.is_finished() {
        return DependResult::Waiting;
    }
    match item.status {
        Some(expected) if task.state == expected => DependResult::Success,
        Some(_) => DependResult::Failed,
        None => result_of_task_state(task.state),
    }
}

/// Evaluates a dependence tree against the other task instances of the same workflow run.
pub(crate) async fn evaluate_siblings(rt: &TaskRuntime, dependence: &DependentParameters) -> Result<DependResult> {
    let siblings = rt
        .ctx
        .process_service
        .find_valid_task_list_by_process_id(rt.process.id, rt.process.test_flag)
        .await?;

    let model_results: Vec<DependResult> = dependence
        .depend_task_list
        .iter()
        .map(|model| {
            let items: Vec<DependResult> = model
                .depend_item_list
                .iter()
                .map(|item| item_result(item, &siblings))
                .collect();
            reduce(model.relation, &items)
        })
        .collect();
    Ok(reduce(dependence.relation, &model_results))
}

#[async_trait]
impl TaskBehavior for ConditionBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Condition
    }

    async fn run(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        let dependence: DependentParameters = params::section(&rt.task.task_params, DEPENDENCE)?;
        let result = evaluate_siblings(rt, &dependence).await?;
        if result == DependResult::Waiting {
            return Ok(true);
        }

        let mut branches: ConditionResult = params::section(&rt.task.task_params, CONDITION_RESULT)?;
        let (taken, state) = if result == DependResult::Success {
            (branches.success_node.clone(), TaskExecutionStatus::Success)
        } else {
            (branches.failed_node.clone(), TaskExecutionStatus::Failure)
        };
        info!(result = ?result, next = ?taken, "condition evaluated");
        branches.taken = Some(taken);
        params::set_section(&mut rt.task.task_params, CONDITION_RESULT, &branches)?;
        rt.finish(state).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;

    fn sibling(code: i64, state: TaskExecutionStatus) -> TaskInstance {
        let mut t = TaskInstance::new(code, code, TaskType::from("SHELL"), 1);
        t.state = state;
        t
    }

    fn item(code: i64, status: TaskExecutionStatus) -> DependentItem {
        DependentItem {
            dep_task_code: DependTarget::Task(code),
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn item_compares_expected_state() {
        let siblings = vec![
            sibling(1, TaskExecutionStatus::Success),
            sibling(2, TaskExecutionStatus::RunningExecution),
        ];
        assert_eq!(item_result(&item(1, TaskExecutionStatus::Success), &siblings), DependResult::Success);
        assert_eq!(item_result(&item(1, TaskExecutionStatus::Failure), &siblings), DependResult::Failed);
        assert_eq!(item_result(&item(2, TaskExecutionStatus::Success), &siblings), DependResult::Waiting);
        assert_eq!(item_result(&item(3, TaskExecutionStatus::Success), &siblings), DependResult::Failed);
    }
}
