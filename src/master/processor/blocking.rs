use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::master::processor::condition::evaluate_siblings;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::dependent::DependentParameters;
use crate::model::params::{self, BLOCKING_CONDITION, BlockingOpportunity, BlockingParameters, DEPENDENCE};
use crate::model::{DependResult, ProcessorKind, TaskExecutionStatus};
use crate::service::alert::AlertKind;

/// Blocks the workflow run when upstream results match the configured opportunity.
pub struct BlockingBehavior;

fn should_block(opportunity: BlockingOpportunity, result: DependResult) -> bool {
    matches!(
        (opportunity, result),
        (BlockingOpportunity::OnSuccess, DependResult::Success)
            | (BlockingOpportunity::OnFailure, DependResult::Failed)
    )
}

#[async_trait]
impl TaskBehavior for BlockingBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Blocking
    }

    async fn run(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        let dependence: DependentParameters = params::section(&rt.task.task_params, DEPENDENCE)?;
        let blocking: BlockingParameters = params::section(&rt.task.task_params, BLOCKING_CONDITION)?;

        let result = evaluate_siblings(rt, &dependence).await?;
        if result == DependResult::Waiting {
            return Ok(true);
        }

        if should_block(blocking.blocking_opportunity, result) {
            rt.refresh_process().await?;
            rt.process.blocked = true;
            rt.ctx
                .process_service
                .update_process_instance(&rt.process)
                .await?;
            info!(opportunity = ?blocking.blocking_opportunity, "workflow run blocked");
            if blocking.is_alert_when_blocking {
                rt.alert(
                    AlertKind::ProcessBlocked,
                    "workflow blocked",
                    json!({ "taskName": rt.task.name, "result": result }),
                )
                .await;
            }
        }
        rt.finish(TaskExecutionStatus::Success).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_only_on_matching_result() {
        assert!(should_block(BlockingOpportunity::OnFailure, DependResult::Failed));
        assert!(should_block(BlockingOpportunity::OnSuccess, DependResult::Success));
        assert!(!should_block(BlockingOpportunity::OnFailure, DependResult::Success));
        assert!(!should_block(BlockingOpportunity::OnSuccess, DependResult::Failed));
    }
}
