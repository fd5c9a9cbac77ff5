use anyhow::{Result, Context as AnyhowContext};
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Host;

/// Resend policy of the in-flight message table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Total sends, the first one included.
    pub max_attempts: u32,
    pub tick_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 5,
            tick_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub host: Host,
    pub redis_url: String,
    pub dispatch_queue_capacity: usize,
    pub max_dispatch_retries: u32,
    pub task_commit_retry_times: u32,
    pub task_commit_interval_ms: u64,
    pub state_wheel_interval_ms: u64,
    /// Worker addresses per worker group.
    pub worker_groups: std::collections::BTreeMap<String, Vec<Host>>,
    pub alert_webhook: Option<String>,
    pub retry: RetryConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        let mut worker_groups = std::collections::BTreeMap::new();
        worker_groups.insert("default".to_string(), vec![Host::new("127.0.0.1:1234")]);
        Self {
            host: Host::new("127.0.0.1:5678"),
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            dispatch_queue_capacity: 10_000,
            max_dispatch_retries: 3,
            task_commit_retry_times: 5,
            task_commit_interval_ms: 1_000,
            state_wheel_interval_ms: 1_000,
            worker_groups,
            alert_webhook: None,
            retry: RetryConfig::default(),
        }
    }
}

impl MasterConfig {
    pub fn task_commit_interval(&self) -> Duration {
        Duration::from_millis(self.task_commit_interval_ms)
    }

    pub fn state_wheel_interval(&self) -> Duration {
        Duration::from_millis(self.state_wheel_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub host: Host,
    pub redis_url: String,
    pub groups: Vec<String>,
    /// Plugins running at the same time.
    pub exec_threads: usize,
    /// Accepted tasks waiting for a free slot.
    pub task_queue_size: usize,
    pub exec_base_dir: PathBuf,
    pub resource_base_dir: PathBuf,
    pub tenant_auto_create: bool,
    /// Keep execution directories after the task finished.
    pub keep_exec_dir: bool,
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: Host::new("127.0.0.1:1234"),
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            groups: vec!["default".to_string()],
            exec_threads: 100,
            task_queue_size: 100,
            exec_base_dir: PathBuf::from("/tmp/dagflow"),
            resource_base_dir: PathBuf::from("/tmp/dagflow/resources"),
            tenant_auto_create: false,
            keep_exec_dir: false,
            retry: RetryConfig::default(),
        }
    }
}

fn load_yaml<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read config file from {}", file_path))?;

    let config: T = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", file_path))?;

    Ok(config)
}

pub fn load_master_config(file_path: &str) -> Result<MasterConfig> {
    load_yaml(file_path)
}

pub fn load_worker_config(file_path: &str) -> Result<WorkerConfig> {
    load_yaml(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: \"10.0.0.1:5678\"\nmax_dispatch_retries: 7\nretry:\n  max_attempts: 2").unwrap();

        let config = load_master_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.host, Host::new("10.0.0.1:5678"));
        assert_eq!(config.max_dispatch_retries, 7);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.dispatch_queue_capacity, 10_000);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_worker_config("/nonexistent/worker.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/worker.yaml"));
    }
}
