#![allow(dead_code)]

use dagflow::config::{MasterConfig, RetryConfig, WorkerConfig};
use dagflow::master::Master;
use dagflow::model::{Host, ProcessInstance, TaskInstance, TaskType};
use dagflow::plugin::TaskPluginRegistry;
use dagflow::rpc::command::Command;
use dagflow::rpc::transport::{InMemoryNetwork, InMemoryTransport};
use dagflow::service::alert::RecordingAlertClient;
use dagflow::service::memory::InMemoryProcessService;
use dagflow::service::registry::{StaticWorkerRegistry, WorkerRegistry};
use dagflow::service::storage::LocalStorageOperate;
use dagflow::worker::Worker;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const MASTER: &str = "master:5678";
pub const WORKER_A: &str = "worker-a:1234";
pub const WORKER_B: &str = "worker-b:1234";

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 20,
        multiplier: 2.0,
        max_delay_ms: 200,
        max_attempts: 3,
        tick_ms: 10,
    }
}

pub fn master_config() -> MasterConfig {
    MasterConfig {
        host: Host::new(MASTER),
        task_commit_retry_times: 3,
        task_commit_interval_ms: 1,
        max_dispatch_retries: 3,
        state_wheel_interval_ms: 10,
        retry: fast_retry(),
        ..MasterConfig::default()
    }
}

pub fn worker_config(host: &str, exec_base_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        host: Host::new(host),
        exec_threads: 2,
        task_queue_size: 2,
        exec_base_dir: exec_base_dir.to_path_buf(),
        resource_base_dir: exec_base_dir.join("resources"),
        retry: fast_retry(),
        ..WorkerConfig::default()
    }
}

/// A master wired to an in-memory network, with its own inbox readable by the test.
pub struct MasterHarness {
    pub network: Arc<InMemoryNetwork>,
    pub transport: Arc<InMemoryTransport>,
    pub store: Arc<InMemoryProcessService>,
    pub alerts: Arc<RecordingAlertClient>,
    pub registry: Arc<StaticWorkerRegistry>,
    pub master: Master,
}

impl MasterHarness {
    pub fn new() -> Self {
        Self::with_config(master_config())
    }

    pub fn with_config(config: MasterConfig) -> Self {
        let network = InMemoryNetwork::new();
        Self::on_network(network, config)
    }

    pub fn on_network(network: Arc<InMemoryNetwork>, config: MasterConfig) -> Self {
        Self::build(network, config, None)
    }

    /// Master looking workers up in `lookup` instead of the static `registry`.
    pub fn with_registry(config: MasterConfig, lookup: Arc<dyn WorkerRegistry>) -> Self {
        Self::build(InMemoryNetwork::new(), config, Some(lookup))
    }

    fn build(network: Arc<InMemoryNetwork>, config: MasterConfig, lookup: Option<Arc<dyn WorkerRegistry>>) -> Self {
        let transport = Arc::new(network.join(config.host.clone()));
        let store = Arc::new(InMemoryProcessService::new());
        let alerts = Arc::new(RecordingAlertClient::new());
        let mut groups = BTreeMap::new();
        groups.insert("default".to_string(), vec![Host::new(WORKER_A)]);
        let registry = Arc::new(StaticWorkerRegistry::new(groups));
        let lookup: Arc<dyn WorkerRegistry> = match lookup {
            Some(lookup) => lookup,
            None => registry.clone(),
        };
        let master = Master::new(
            config,
            transport.clone(),
            store.clone(),
            alerts.clone(),
            Arc::new(TaskPluginRegistry::with_defaults()),
            lookup,
        );
        Self {
            network,
            transport,
            store,
            alerts,
            registry,
            master,
        }
    }

    /// Inbox of a worker that only records what it receives.
    pub fn fake_worker(&self, host: &str) -> InMemoryTransport {
        self.network.join(Host::new(host))
    }

    pub fn process(&self, id: i64) -> ProcessInstance {
        let mut process = ProcessInstance::new(id, 100 + id, 1);
        process.tenant_code = Some("root".to_string());
        process.host = Some(Host::new(MASTER));
        self.store.insert_process(process.clone());
        process
    }
}

pub fn shell_task(id: i64, task_code: i64, process_instance_id: i64, script: &str) -> TaskInstance {
    TaskInstance::new(id, task_code, TaskType::from("SHELL"), process_instance_id)
        .with_params(json!({ "rawScript": script }))
}

pub fn logic_task(id: i64, task_code: i64, task_type: &str, process_instance_id: i64, params: Value) -> TaskInstance {
    TaskInstance::new(id, task_code, TaskType::from(task_type), process_instance_id).with_params(params)
}

/// A real worker on the same network as `harness`.
pub fn start_worker(harness: &MasterHarness, host: &str, exec_base_dir: &Path) -> (Worker, Arc<InMemoryTransport>) {
    let transport = Arc::new(harness.network.join(Host::new(host)));
    let config = worker_config(host, exec_base_dir);
    let storage = Arc::new(LocalStorageOperate::new(config.resource_base_dir.clone()));
    let worker = Worker::new(
        config,
        transport.clone(),
        Arc::new(TaskPluginRegistry::with_defaults()),
        storage,
    );
    (worker, transport)
}

pub fn of_type(commands: &[Command], command_type: dagflow::rpc::CommandType) -> Vec<Command> {
    commands
        .iter()
        .filter(|c| c.command_type == command_type)
        .cloned()
        .collect()
}
