use anyhow::{Context, Result};
use clap::Parser;
use dagflow::config::{MasterConfig, load_master_config};
use dagflow::logging::init_tracing;
use dagflow::master::Master;
use dagflow::model::{Host, ProcessDefinitionRef, ProcessInstance, TaskInstance};
use dagflow::plugin::TaskPluginRegistry;
use dagflow::rpc::redis_transport::RedisTransport;
use dagflow::rpc::transport::Transport;
use dagflow::service::alert::{AlertClientService, HttpAlertClient, LogAlertClient};
use dagflow::service::memory::InMemoryProcessService;
use dagflow::service::registry::StaticWorkerRegistry;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Master node: schedules task instances onto workers", long_about = None)]
struct Args {
    /// Master config YAML; defaults apply when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `host` from the config
    #[arg(long)]
    host: Option<String>,

    /// Overrides `redis_url` from the config
    #[arg(long)]
    redis: Option<String>,

    /// YAML file with workflow runs and task instances to submit at start-up
    #[arg(long)]
    workload: Option<PathBuf>,
}

/// Seed data for the in-memory process store.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Workload {
    definitions: Vec<ProcessDefinitionRef>,
    processes: Vec<ProcessInstance>,
    tasks: Vec<TaskInstance>,
}

fn load_config(args: &Args) -> Result<MasterConfig> {
    let mut config = match &args.config {
        Some(path) => load_master_config(&path.to_string_lossy())?,
        None => MasterConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = Host::new(host.clone());
    }
    if let Some(redis) = &args.redis {
        config.redis_url = redis.clone();
    }
    Ok(config)
}

fn load_workload(path: &PathBuf) -> Result<Workload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workload from {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to deserialize workload from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    let config = load_config(&args)?;
    info!(host = %config.host, redis = %config.redis_url, "starting master");

    let client = redis::Client::open(config.redis_url.clone())
        .with_context(|| format!("Invalid Redis URL {}", config.redis_url))?;
    let transport: Arc<dyn Transport> = Arc::new(RedisTransport::new(client, config.host.clone()));

    let process_service = Arc::new(InMemoryProcessService::new());
    let workload = match &args.workload {
        Some(path) => load_workload(path)?,
        None => Workload::default(),
    };
    for definition in workload.definitions {
        process_service.insert_definition(definition);
    }
    for process in workload.processes {
        process_service.insert_process(process);
    }

    let alert: Arc<dyn AlertClientService> = match &config.alert_webhook {
        Some(webhook) => Arc::new(HttpAlertClient::new(webhook.clone())),
        None => Arc::new(LogAlertClient),
    };
    let registry = Arc::new(StaticWorkerRegistry::new(config.worker_groups.clone()));
    let master = Master::new(
        config,
        Arc::clone(&transport),
        process_service.clone(),
        alert,
        Arc::new(TaskPluginRegistry::with_defaults()),
        registry,
    );

    for task in workload.tasks {
        let Some(process) = process_service.process(task.process_instance_id) else {
            error!(task_instance_id = task.id, process_instance_id = task.process_instance_id, "task without workflow run skipped");
            continue;
        };
        if let Err(e) = master.scheduler.submit(process, task).await {
            error!(error = %e, "submit failed");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    master.run(transport, shutdown_rx).await;
    Ok(())
}
