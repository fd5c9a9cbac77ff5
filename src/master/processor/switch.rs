use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::expression::switch::choose_branch;
use crate::expression::var_pool::param_map;
use crate::master::processor::{TaskBehavior, TaskRuntime};
use crate::model::params::{self, SWITCH_RESULT, SwitchParameters, SwitchResultVo};
use crate::model::{ProcessorKind, TaskExecutionStatus};

/// Picks one outgoing branch from ordered conditions over workflow variables.
pub struct SwitchBehavior;

#[async_trait]
impl TaskBehavior for SwitchBehavior {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Switch
    }

    async fn run(&mut self, rt: &mut TaskRuntime) -> Result<bool> {
        rt.refresh_process().await?;
        let mut switch: SwitchParameters = params::section(&rt.task.task_params, SWITCH_RESULT)?;

        let mut branches = switch.depend_task_list.clone();
        branches.push(SwitchResultVo {
            condition: String::new(),
            next_node: switch.next_node,
        });
        let vars = param_map(&rt.process.global_params, &rt.process.var_pool);

        let chosen = match choose_branch(&branches, &vars) {
            Ok(Some(i)) => i,
            Ok(None) => {
                warn!("no switch branch matched");
                rt.finish(TaskExecutionStatus::Failure).await?;
                return Ok(true);
            }
            Err(e) => {
                warn!(error = %e, "switch condition could not be evaluated");
                rt.finish(TaskExecutionStatus::Failure).await?;
                return Ok(true);
            }
        };

        let Some(next) = branches[chosen].next_node else {
            warn!(branch = chosen, "chosen switch branch has no next node");
            rt.finish(TaskExecutionStatus::Failure).await?;
            return Ok(true);
        };

        switch.result_condition_location = Some(chosen);
        params::set_section(&mut rt.task.task_params, SWITCH_RESULT, &switch)?;
        info!(branch = chosen, next_node = next, "switch branch chosen");
        rt.finish(TaskExecutionStatus::Success).await?;
        Ok(true)
    }
}
