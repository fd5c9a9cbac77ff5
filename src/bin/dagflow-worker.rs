use anyhow::{Context, Result};
use clap::Parser;
use dagflow::config::{WorkerConfig, load_worker_config};
use dagflow::logging::init_tracing;
use dagflow::model::Host;
use dagflow::plugin::TaskPluginRegistry;
use dagflow::rpc::redis_transport::RedisTransport;
use dagflow::rpc::transport::Transport;
use dagflow::service::storage::LocalStorageOperate;
use dagflow::worker::Worker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Worker node: executes dispatched tasks", long_about = None)]
struct Args {
    /// Worker config YAML; defaults apply when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `host` from the config
    #[arg(long)]
    host: Option<String>,

    /// Overrides `redis_url` from the config
    #[arg(long)]
    redis: Option<String>,
}

fn load_config(args: &Args) -> Result<WorkerConfig> {
    let mut config = match &args.config {
        Some(path) => load_worker_config(&path.to_string_lossy())?,
        None => WorkerConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = Host::new(host.clone());
    }
    if let Some(redis) = &args.redis {
        config.redis_url = redis.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        host = %config.host,
        groups = ?config.groups,
        exec_threads = config.exec_threads,
        "starting worker"
    );

    let client = redis::Client::open(config.redis_url.clone())
        .with_context(|| format!("Invalid Redis URL {}", config.redis_url))?;
    let transport: Arc<dyn Transport> = Arc::new(RedisTransport::new(client, config.host.clone()));
    let storage = Arc::new(LocalStorageOperate::new(config.resource_base_dir.clone()));

    let worker = Worker::new(
        config,
        Arc::clone(&transport),
        Arc::new(TaskPluginRegistry::with_defaults()),
        storage,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(transport, shutdown_rx).await;
    Ok(())
}
