pub mod state;
pub mod property;
pub mod task;
pub mod process;
pub mod dependent;
pub mod params;
pub mod context;

pub use context::TaskExecutionContext;
pub use process::{ProcessInstance, ProcessDefinitionRef, TriggerType};
pub use property::{Property, Direct, DataType};
pub use state::{TaskExecutionStatus, WorkflowExecutionStatus, DependResult, Priority};
pub use task::{Host, TaskInstance, TaskType, ProcessorKind, TaskTimeout, TaskTimeoutStrategy};
