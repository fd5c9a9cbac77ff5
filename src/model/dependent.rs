use serde::{Serialize, Deserialize};

use crate::model::state::TaskExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependentRelation {
    #[default]
    And,
    Or,
}

/// What a dependent item points at inside a workflow. Encoded as `0` for every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum DependTarget {
    AllTasks,
    Task(i64),
}

impl From<i64> for DependTarget {
    fn from(code: i64) -> Self {
        if code == 0 { DependTarget::AllTasks } else { DependTarget::Task(code) }
    }
}

impl From<DependTarget> for i64 {
    fn from(target: DependTarget) -> Self {
        match target {
            DependTarget::AllTasks => 0,
            DependTarget::Task(code) => code,
        }
    }
}

impl Default for DependTarget {
    fn default() -> Self {
        DependTarget::AllTasks
    }
}

/// A single leaf predicate.
///
/// Dependent tasks use `definition_code`/`cycle`/`date_value` to look at history of another
/// workflow. Condition and blocking tasks use `dep_task_code` + `status` against sibling
/// tasks of the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DependentItem {
    pub project_code: i64,
    pub definition_code: i64,
    pub dep_task_code: DependTarget,
    pub cycle: String,
    pub date_value: String,
    pub status: Option<TaskExecutionStatus>,
}

impl DependentItem {
    /// Stable cache key of this item.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.project_code,
            self.definition_code,
            i64::from(self.dep_task_code),
            self.cycle,
            self.date_value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DependentTaskModel {
    pub relation: DependentRelation,
    pub depend_item_list: Vec<DependentItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DependentParameters {
    pub relation: DependentRelation,
    pub depend_task_list: Vec<DependentTaskModel>,
}
