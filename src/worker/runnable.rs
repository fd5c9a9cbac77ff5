use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeDelta};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, warn};

use crate::error::SchedulerError;
use crate::logging::execution_span;
use crate::model::{TaskExecutionContext, TaskExecutionStatus, TaskTimeout};
use crate::plugin::{TaskCallback, TaskOutcome};
use crate::worker::WorkerContext;
use crate::worker::os;

/// Time a task may still run before its timeout fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    /// No failing timeout configured.
    Unbounded,
    Left(Duration),
    Expired,
}

/// Only timeouts whose strategy fails the task are enforced on the worker; warnings are the
/// master's business.
pub fn remaining_time(timeout: &TaskTimeout, start: NaiveDateTime, now: NaiveDateTime) -> RemainingTime {
    if !timeout.enabled || !timeout.strategy.fails() {
        return RemainingTime::Unbounded;
    }
    let deadline = start + TimeDelta::minutes(i64::from(timeout.minutes));
    match (deadline - now).to_std() {
        Ok(left) if !left.is_zero() => RemainingTime::Left(left),
        _ => RemainingTime::Expired,
    }
}

/// How long the task still has to wait before its delay window is over.
pub fn delay_remaining(first_submit_time: Option<NaiveDateTime>, delay_minutes: u32, now: NaiveDateTime) -> Option<Duration> {
    if delay_minutes == 0 {
        return None;
    }
    let submitted = first_submit_time?;
    let ready_at = submitted + TimeDelta::minutes(i64::from(delay_minutes));
    (ready_at - now).to_std().ok().filter(|d| !d.is_zero())
}

/// `<base>/exec/process/<tenant>/<project>/<definition>_<version>/<process instance>/<task instance>`
pub fn execution_dir(base: &Path, ctx: &TaskExecutionContext) -> PathBuf {
    base.join("exec")
        .join("process")
        .join(&ctx.tenant_code)
        .join(ctx.project_code.to_string())
        .join(format!("{}_{}", ctx.process_define_code, ctx.process_define_version))
        .join(ctx.process_instance_id.to_string())
        .join(ctx.task_instance_id.to_string())
}

/// Forwards plugin progress into the cache and to the master.
struct ReportingCallback<'a> {
    worker: &'a WorkerContext,
    task_instance_id: i64,
}

impl ReportingCallback<'_> {
    async fn report(&self, ctx: Option<TaskExecutionContext>) {
        let Some(ctx) = ctx else {
            return;
        };
        if let Err(e) = self.worker.sender.send_running(&ctx).await {
            warn!(task_instance_id = self.task_instance_id, error = %e, "progress report failed");
        }
    }
}

#[async_trait]
impl TaskCallback for ReportingCallback<'_> {
    async fn update_process_id(&self, process_id: u32) {
        let ctx = self
            .worker
            .cache
            .update(self.task_instance_id, |c| c.process_id = process_id);
        self.report(ctx).await;
    }

    async fn update_app_ids(&self, app_ids: &str) {
        let ctx = self
            .worker
            .cache
            .update(self.task_instance_id, |c| c.app_ids = Some(app_ids.to_string()));
        self.report(ctx).await;
    }
}

/// Executes one dispatched task on the worker, from preparation to the final report.
pub struct WorkerTaskExecuteRunnable {
    worker: Arc<WorkerContext>,
    task: TaskExecutionContext,
}

impl WorkerTaskExecuteRunnable {
    pub fn new(worker: Arc<WorkerContext>, task: TaskExecutionContext) -> Self {
        Self { worker, task }
    }

    pub fn task_instance_id(&self) -> i64 {
        self.task.task_instance_id
    }

    pub async fn run(mut self) {
        let span = execution_span(&self.task);
        async move {
            let outcome = match self.execute().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = ?e, "task execution failed");
                    TaskOutcome::failure(-1)
                }
            };
            if let Err(e) = self.finish(outcome).await {
                error!(error = ?e, "failed to report task result");
            }
        }
        .instrument(span)
        .await
    }

    /// Applies `f` to the cached context, which also carries changes made by request handlers.
    fn apply<F>(&mut self, f: F) -> TaskExecutionContext
    where
        F: Fn(&mut TaskExecutionContext),
    {
        match self.worker.cache.update(self.task.task_instance_id, &f) {
            Some(ctx) => self.task = ctx,
            None => f(&mut self.task),
        }
        self.task.clone()
    }

    async fn execute(&mut self) -> Result<TaskOutcome> {
        let id = self.task.task_instance_id;
        let tenant = self.task.tenant_code.clone();
        if !os::tenant_exists(&tenant).await? {
            if !self.worker.config.tenant_auto_create {
                error!(tenant = %tenant, "tenant does not exist on this worker");
                return Ok(TaskOutcome::failure(-1));
            }
            os::create_tenant(&tenant).await?;
        }

        let exec_dir = execution_dir(&self.worker.config.exec_base_dir, &self.task);
        tokio::fs::create_dir_all(&exec_dir).await?;
        let exec_path = exec_dir.to_string_lossy().to_string();
        self.apply(|c| c.execute_path = Some(exec_path.clone()));
        self.download_resources(&exec_dir).await?;

        let cancel_signal = self
            .worker
            .cache
            .cancel_signal(id)
            .ok_or_else(|| anyhow!("Task instance {} missing from the context cache", id))?;

        let now = Local::now().naive_local();
        if let Some(wait) = delay_remaining(self.task.first_submit_time, self.task.delay_time, now) {
            let ctx = self.apply(|c| c.current_execution_status = TaskExecutionStatus::DelayExecution);
            self.worker.sender.send_running(&ctx).await?;
            info!(wait_secs = wait.as_secs(), "task delayed");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_signal.notified() => {
                    info!("task killed while delayed");
                    return Ok(TaskOutcome::killed());
                }
            }
        }
        if self.worker.cache.is_cancelled(id) {
            return Ok(TaskOutcome::killed());
        }

        let channel = self
            .worker
            .plugins
            .get(self.task.task_type.name())
            .ok_or_else(|| SchedulerError::execution(format!("no plugin for task type {}", self.task.task_type)))?;

        let start_time = Local::now().naive_local();
        let ctx = self.apply(|c| {
            c.current_execution_status = TaskExecutionStatus::RunningExecution;
            c.start_time = Some(start_time);
        });
        self.worker.sender.send_running(&ctx).await?;

        let task = channel
            .create_task(&ctx)
            .map_err(|e| SchedulerError::execution(format!("plugin could not prepare task: {:#}", e)))?;
        self.worker.cache.attach_task(id, Arc::clone(&task));
        info!(exec_dir = %exec_dir.display(), "task started");

        let callback = ReportingCallback {
            worker: &self.worker,
            task_instance_id: id,
        };
        let now = Local::now().naive_local();
        let outcome = match remaining_time(&ctx.timeout, start_time, now) {
            RemainingTime::Unbounded => task.handle(&callback).await?,
            RemainingTime::Left(left) => match tokio::time::timeout(left, task.handle(&callback)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    warn!(timeout_minutes = ctx.timeout.minutes, "task timed out, cancelling");
                    task.cancel().await?;
                    TaskOutcome::failure(-1)
                }
            },
            RemainingTime::Expired => {
                warn!("task timed out before it started");
                TaskOutcome::failure(-1)
            }
        };

        if self.worker.cache.is_cancelled(id) && !outcome.status.is_success() {
            return Ok(TaskOutcome::killed());
        }
        Ok(outcome)
    }

    async fn download_resources(&self, exec_dir: &Path) -> Result<()> {
        for (full_name, owner) in &self.task.resources {
            let file_name = Path::new(full_name)
                .file_name()
                .ok_or_else(|| anyhow!("Invalid resource name {}", full_name))?;
            let dest = exec_dir.join(file_name);
            if tokio::fs::try_exists(&dest).await? {
                continue;
            }
            self.worker.storage.download(owner, full_name, &dest).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, outcome: TaskOutcome) -> Result<()> {
        let end_time = Local::now().naive_local();
        let ctx = self.apply(|c| {
            c.current_execution_status = outcome.status;
            c.end_time = Some(end_time);
            c.var_pool = outcome.var_pool.clone();
            if outcome.app_ids.is_some() {
                c.app_ids = outcome.app_ids.clone();
            }
        });
        info!(status = %outcome.status, exit_code = outcome.exit_code, "task finished");
        self.worker.sender.send_result(&ctx).await?;

        if !self.worker.config.keep_exec_dir {
            if let Some(dir) = &ctx.execute_path {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    warn!(exec_dir = %dir, error = %e, "failed to clean execution directory");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskTimeoutStrategy;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn warn_only_timeouts_are_unbounded() {
        let timeout = TaskTimeout {
            enabled: true,
            strategy: TaskTimeoutStrategy::Warn,
            minutes: 1,
        };
        assert_eq!(remaining_time(&timeout, at(10, 0), at(12, 0)), RemainingTime::Unbounded);
    }

    #[test]
    fn failing_timeout_counts_down() {
        let timeout = TaskTimeout {
            enabled: true,
            strategy: TaskTimeoutStrategy::WarnFailed,
            minutes: 30,
        };
        assert_eq!(
            remaining_time(&timeout, at(10, 0), at(10, 20)),
            RemainingTime::Left(Duration::from_secs(600))
        );
        assert_eq!(remaining_time(&timeout, at(10, 0), at(10, 30)), RemainingTime::Expired);
        assert_eq!(remaining_time(&timeout, at(10, 0), at(11, 0)), RemainingTime::Expired);
    }

    #[test]
    fn delay_window() {
        assert_eq!(delay_remaining(Some(at(10, 0)), 0, at(10, 0)), None);
        assert_eq!(delay_remaining(None, 5, at(10, 0)), None);
        assert_eq!(
            delay_remaining(Some(at(10, 0)), 5, at(10, 2)),
            Some(Duration::from_secs(180))
        );
        assert_eq!(delay_remaining(Some(at(10, 0)), 5, at(10, 6)), None);
    }
}
