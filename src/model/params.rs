use anyhow::Result;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SchedulerError;

pub const DEPENDENCE: &str = "dependence";
pub const SWITCH_RESULT: &str = "switchResult";
pub const CONDITION_RESULT: &str = "conditionResult";
pub const BLOCKING_CONDITION: &str = "blockingCondition";
pub const PROCESS_DEFINITION_CODE: &str = "processDefinitionCode";

/// One switch branch. An empty condition always matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchResultVo {
    pub condition: String,
    pub next_node: Option<i64>,
}

impl SwitchResultVo {
    pub fn new(condition: impl Into<String>, next_node: i64) -> Self {
        Self {
            condition: condition.into(),
            next_node: Some(next_node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchParameters {
    pub depend_task_list: Vec<SwitchResultVo>,
    /// Default branch taken when nothing else matches.
    pub next_node: Option<i64>,
    pub result_condition_location: Option<usize>,
}

impl SwitchParameters {
    /// Branch chosen by the last evaluation. The position right after the listed branches
    /// is the default branch.
    pub fn chosen_branch(&self) -> Option<SwitchResultVo> {
        let i = self.result_condition_location?;
        match self.depend_task_list.get(i) {
            Some(branch) => Some(branch.clone()),
            None if i == self.depend_task_list.len() => Some(SwitchResultVo {
                condition: String::new(),
                next_node: self.next_node,
            }),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionResult {
    pub success_node: Vec<i64>,
    pub failed_node: Vec<i64>,
    /// Filled in once the condition was evaluated.
    pub taken: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlockingOpportunity {
    #[serde(rename = "BlockingOnSuccess")]
    OnSuccess,
    #[default]
    #[serde(rename = "BlockingOnFailed")]
    OnFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockingParameters {
    pub blocking_opportunity: BlockingOpportunity,
    pub is_alert_when_blocking: bool,
}

/// Reads one named section of the task params JSON, default when absent.
pub fn section<T: DeserializeOwned + Default>(task_params: &Value, key: &str) -> Result<T> {
    match task_params.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            SchedulerError::definition(format!("Invalid task params section '{}': {}", key, e)).into()
        }),
    }
}

/// Writes one named section back into the task params JSON.
pub fn set_section<T: Serialize>(task_params: &mut Value, key: &str, value: &T) -> Result<()> {
    if !task_params.is_object() {
        *task_params = Value::Object(Default::default());
    }
    let encoded = serde_json::to_value(value)?;
    if let Some(obj) = task_params.as_object_mut() {
        obj.insert(key.to_string(), encoded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_section_is_default() {
        let params = json!({});
        let sw: SwitchParameters = section(&params, SWITCH_RESULT).unwrap();
        assert!(sw.depend_task_list.is_empty());
    }

    #[test]
    fn blocking_opportunity_wire_names() {
        let params = json!({ "blockingCondition": { "blockingOpportunity": "BlockingOnSuccess", "isAlertWhenBlocking": true } });
        let b: BlockingParameters = section(&params, BLOCKING_CONDITION).unwrap();
        assert_eq!(b.blocking_opportunity, BlockingOpportunity::OnSuccess);
        assert!(b.is_alert_when_blocking);
    }

    #[test]
    fn chosen_branch_past_the_list_is_the_default() {
        let mut sw = SwitchParameters {
            depend_task_list: vec![SwitchResultVo::new("${x} > 5", 11)],
            next_node: Some(13),
            result_condition_location: Some(1),
        };
        assert_eq!(sw.chosen_branch().and_then(|b| b.next_node), Some(13));
        sw.result_condition_location = Some(0);
        assert_eq!(sw.chosen_branch().and_then(|b| b.next_node), Some(11));
        sw.result_condition_location = Some(2);
        assert!(sw.chosen_branch().is_none());
    }

    #[test]
    fn set_section_on_null_params() {
        let mut params = Value::Null;
        set_section(&mut params, CONDITION_RESULT, &ConditionResult::default()).unwrap();
        assert!(params.get(CONDITION_RESULT).is_some());
    }
}
