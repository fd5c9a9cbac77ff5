use serde::{Serialize, Deserialize};
use std::fmt;

/// Execution state of a single task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStatus {
    SubmittedSuccess,
    Dispatch,
    RunningExecution,
    DelayExecution,
    Pause,
    Failure,
    Success,
    NeedFaultTolerance,
    Kill,
    ForcedSuccess,
}

impl TaskExecutionStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Kill | Self::Pause | Self::ForcedSuccess
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::ForcedSuccess)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::RunningExecution | Self::DelayExecution)
    }
}

impl fmt::Display for TaskExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Execution state of a workflow (process) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExecutionStatus {
    SubmittedSuccess,
    RunningExecution,
    ReadyPause,
    Pause,
    ReadyStop,
    Stop,
    Failure,
    Success,
    DelayExecution,
    ReadyBlock,
    Block,
}

impl WorkflowExecutionStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Pause | Self::Stop | Self::Failure | Self::Success | Self::Block
        )
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Terminal task state a sub-process task takes over from its child workflow.
    pub fn as_task_status(self) -> TaskExecutionStatus {
        match self {
            Self::Success => TaskExecutionStatus::Success,
            Self::Stop => TaskExecutionStatus::Kill,
            Self::Pause => TaskExecutionStatus::Pause,
            _ => TaskExecutionStatus::Failure,
        }
    }
}

/// Outcome of a dependency or condition evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependResult {
    Success,
    Waiting,
    Failed,
}

impl DependResult {
    pub fn is_terminal(self) -> bool {
        self != Self::Waiting
    }
}

/// Scheduling priority. Lower ordinal dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
}

impl Priority {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_states() {
        assert!(TaskExecutionStatus::Kill.is_finished());
        assert!(TaskExecutionStatus::ForcedSuccess.is_success());
        assert!(!TaskExecutionStatus::Dispatch.is_finished());
        assert!(!TaskExecutionStatus::DelayExecution.is_finished());
    }

    #[test]
    fn workflow_state_maps_to_task_state() {
        assert_eq!(WorkflowExecutionStatus::Stop.as_task_status(), TaskExecutionStatus::Kill);
        assert_eq!(WorkflowExecutionStatus::Success.as_task_status(), TaskExecutionStatus::Success);
        assert_eq!(WorkflowExecutionStatus::Failure.as_task_status(), TaskExecutionStatus::Failure);
    }

    #[test]
    fn priority_order() {
        assert!(Priority::Highest < Priority::Lowest);
        assert_eq!(Priority::Medium.code(), 2);
    }
}
