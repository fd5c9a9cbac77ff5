use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resource storage, addressed by tenant and full resource name.
#[async_trait]
pub trait StorageOperate: Send + Sync {
    async fn exists(&self, tenant: &str, full_name: &str) -> Result<bool>;

    /// Copies a resource to `dest`, creating parent directories.
    async fn download(&self, tenant: &str, full_name: &str, dest: &Path) -> Result<()>;
}

/// Resources stored under `<base>/<tenant>/<full name>` on the local disk.
pub struct LocalStorageOperate {
    base_dir: PathBuf,
}

impl LocalStorageOperate {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_of(&self, tenant: &str, full_name: &str) -> PathBuf {
        self.base_dir
            .join(tenant)
            .join(full_name.trim_start_matches('/'))
    }
}

#[async_trait]
impl StorageOperate for LocalStorageOperate {
    async fn exists(&self, tenant: &str, full_name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_of(tenant, full_name)).await?)
    }

    async fn download(&self, tenant: &str, full_name: &str, dest: &Path) -> Result<()> {
        let src = self.path_of(tenant, full_name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::copy(&src, dest)
            .await
            .with_context(|| format!("Failed to fetch resource {}", src.display()))?;
        debug!(resource = full_name, dest = %dest.display(), "resource downloaded");
        Ok(())
    }
}
