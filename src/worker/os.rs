//! Operating-system side effects of the worker: tenants and killing processes.

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;
use tracing::{info, warn};

const PASSWD: &str = "/etc/passwd";

/// True when `tenant` is a local user.
pub async fn tenant_exists(tenant: &str) -> Result<bool> {
    let passwd = tokio::fs::read_to_string(PASSWD)
        .await
        .with_context(|| format!("Failed to read {}", PASSWD))?;
    Ok(passwd_has_user(&passwd, tenant))
}

fn passwd_has_user(passwd: &str, user: &str) -> bool {
    passwd
        .lines()
        .filter_map(|line| line.split(':').next())
        .any(|name| name == user)
}

pub async fn create_tenant(tenant: &str) -> Result<()> {
    let status = Command::new("useradd")
        .args(["-m", tenant])
        .status()
        .await
        .context("Failed to run useradd")?;
    if !status.success() {
        return Err(anyhow!("useradd {} exited with {}", tenant, status));
    }
    info!(tenant, "tenant created");
    Ok(())
}

/// Sends SIGKILL to the whole process group led by `pid`.
pub async fn kill_process_group(pid: u32) -> Result<()> {
    let group = format!("-{}", pid);
    let output = Command::new("kill")
        .args(["-9", "--", &group])
        .output()
        .await
        .context("Failed to run kill")?;
    if !output.status.success() {
        return Err(anyhow!(
            "kill -9 {} failed: {}",
            group,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    info!(pid, "process group killed");
    Ok(())
}

/// Splits the comma-separated app id list reported by plugins.
pub fn parse_app_ids(app_ids: Option<&str>) -> Vec<String> {
    app_ids
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Asks YARN to kill applications started by a task. Failures are logged per application.
pub async fn kill_applications(app_ids: &[String]) {
    for app_id in app_ids {
        let result = Command::new("yarn")
            .args(["application", "-kill", app_id])
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => info!(app_id = %app_id, "application killed"),
            Ok(output) => warn!(
                app_id = %app_id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "application kill failed"
            ),
            Err(e) => warn!(app_id = %app_id, error = %e, "yarn not available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_user_in_passwd() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\netl:x:1000:1000::/home/etl:/bin/sh\n";
        assert!(passwd_has_user(passwd, "etl"));
        assert!(!passwd_has_user(passwd, "et"));
        assert!(!passwd_has_user(passwd, "x"));
    }

    #[test]
    fn app_ids_are_split() {
        assert_eq!(
            parse_app_ids(Some("application_1, application_2,")),
            vec!["application_1", "application_2"]
        );
        assert!(parse_app_ids(None).is_empty());
    }
}
