use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::expression::placeholder::substitute_raw;
use crate::model::{Direct, Property, TaskExecutionContext};
use crate::plugin::{
    ExecutableTask, ResourceRequirements, TaskCallback, TaskChannel, TaskOutcome, TaskParameters,
};

static SET_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{setValue\(([^=]+)=(.*)\)\}$").expect("setValue pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellParameters {
    pub raw_script: String,
    pub resource_list: Vec<ResourceInfo>,
    pub local_params: Vec<Property>,
}

impl TaskParameters for ShellParameters {
    fn check_parameters(&self) -> bool {
        !self.raw_script.trim().is_empty()
    }

    fn resource_requirements(&self) -> ResourceRequirements {
        ResourceRequirements {
            resource_names: self
                .resource_list
                .iter()
                .map(|r| r.resource_name.clone())
                .collect(),
            ..Default::default()
        }
    }
}

pub struct ShellTaskChannel;

impl TaskChannel for ShellTaskChannel {
    fn task_type(&self) -> &str {
        "SHELL"
    }

    fn parse_parameters(&self, task_params: &Value) -> Result<Box<dyn TaskParameters>> {
        let params: ShellParameters = serde_json::from_value(task_params.clone())
            .context("Invalid SHELL parameters")?;
        Ok(Box::new(params))
    }

    fn create_task(&self, ctx: &TaskExecutionContext) -> Result<Arc<dyn ExecutableTask>> {
        Ok(Arc::new(ShellTask::new(ctx.clone())))
    }
}

/// Runs `rawScript` with bash in its own process group inside the execution directory.
///
/// Lines of the form `${setValue(name=value)}` on stdout set declared OUT parameters.
pub struct ShellTask {
    ctx: TaskExecutionContext,
    cancelled: AtomicBool,
    cancel_signal: Notify,
    process_id: AtomicU32,
}

impl ShellTask {
    pub fn new(ctx: TaskExecutionContext) -> Self {
        Self {
            ctx,
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
            process_id: AtomicU32::new(0),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id.load(Ordering::SeqCst)
    }

    fn output_var_pool(declared: &[Property], values: &HashMap<String, String>) -> Vec<Property> {
        declared
            .iter()
            .filter(|p| p.direct == Direct::Out)
            .map(|p| {
                let mut out = p.clone();
                if let Some(v) = values.get(&p.prop) {
                    out.value = v.clone();
                }
                out
            })
            .collect()
    }
}

#[async_trait]
impl ExecutableTask for ShellTask {
    async fn handle(&self, callback: &dyn TaskCallback) -> Result<TaskOutcome> {
        let params: ShellParameters = serde_json::from_value(self.ctx.task_params.clone())
            .context("Invalid SHELL parameters")?;
        let exec_dir = self
            .ctx
            .execute_path
            .clone()
            .ok_or_else(|| anyhow!("Execution directory not set"))?;

        let script_path = Path::new(&exec_dir).join(format!("{}_node.sh", self.ctx.task_instance_id));
        let vars: HashMap<String, Property> = self
            .ctx
            .prepare_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let script = substitute_raw(&params.raw_script, &vars);
        tokio::fs::write(&script_path, script)
            .await
            .with_context(|| format!("Failed to write {}", script_path.display()))?;

        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(TaskOutcome::killed());
        }

        let mut command = Command::new("bash");
        command
            .arg(&script_path)
            .current_dir(&exec_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", script_path.display()))?;
        let pid = child.id().unwrap_or_default();
        self.process_id.store(pid, Ordering::SeqCst);
        callback.update_process_id(pid).await;
        info!(task_instance_id = self.ctx.task_instance_id, pid, "shell started");

        let task_instance_id = self.ctx.task_instance_id;
        let stdout_reader = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut values = HashMap::new();
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(caps) = SET_VALUE.captures(line.trim()) {
                        values.insert(caps[1].trim().to_string(), caps[2].to_string());
                    }
                    info!(task_instance_id, "{}", line);
                }
                values
            })
        });
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(task_instance_id, "{}", line);
                }
            });
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = self.cancel_signal.notified() => {
                let _ = child.start_kill();
                child.wait().await?
            }
        };

        let values = match stdout_reader {
            Some(handle) => handle.await.unwrap_or_default(),
            None => HashMap::new(),
        };

        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(TaskOutcome::killed());
        }
        Ok(match status.code() {
            Some(0) => TaskOutcome::success(Self::output_var_pool(&params.local_params, &values)),
            Some(code) => TaskOutcome::failure(code),
            None => TaskOutcome::killed(),
        })
    }

    async fn cancel(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_signal.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameters_expose_resources() {
        let params = ShellTaskChannel
            .parse_parameters(&json!({
                "rawScript": "cat a.sql",
                "resourceList": [{"resourceName": "/sql/a.sql"}]
            }))
            .unwrap();
        assert!(params.check_parameters());
        assert_eq!(params.resource_requirements().resource_names, vec!["/sql/a.sql"]);
    }

    #[test]
    fn empty_script_is_invalid() {
        let params = ShellTaskChannel.parse_parameters(&json!({"rawScript": "  "})).unwrap();
        assert!(!params.check_parameters());
    }

    #[test]
    fn set_value_lines_fill_declared_outputs() {
        let declared = vec![Property::output("count", ""), Property::new("in", Direct::In, "x")];
        let mut values = HashMap::new();
        values.insert("count".to_string(), "42".to_string());
        values.insert("undeclared".to_string(), "1".to_string());
        let pool = ShellTask::output_var_pool(&declared, &values);
        assert_eq!(pool, vec![Property::output("count", "42")]);

        let caps = SET_VALUE.captures("${setValue(count=42)}").unwrap();
        assert_eq!(&caps[1], "count");
        assert_eq!(&caps[2], "42");
    }
}
