pub mod alert;
pub mod memory;
pub mod process;
pub mod registry;
pub mod storage;

pub use alert::{Alert, AlertClientService, AlertKind};
pub use memory::InMemoryProcessService;
pub use process::ProcessService;
pub use registry::{HostSelector, StaticWorkerRegistry, WorkerRegistry};
pub use storage::{LocalStorageOperate, StorageOperate};
