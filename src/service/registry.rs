use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::Host;

/// Live workers by worker group.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn workers(&self, group: &str) -> Result<Vec<Host>>;
}

/// Worker groups fixed at start-up, adjustable at runtime.
pub struct StaticWorkerRegistry {
    groups: DashMap<String, Vec<Host>>,
}

impl StaticWorkerRegistry {
    pub fn new(groups: BTreeMap<String, Vec<Host>>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
        }
    }

    pub fn set_group(&self, group: impl Into<String>, hosts: Vec<Host>) {
        self.groups.insert(group.into(), hosts);
    }
}

#[async_trait]
impl WorkerRegistry for StaticWorkerRegistry {
    async fn workers(&self, group: &str) -> Result<Vec<Host>> {
        Ok(self.groups.get(group).map(|h| h.value().clone()).unwrap_or_default())
    }
}

/// Round-robin choice among candidate hosts, one cursor per group.
#[derive(Default)]
pub struct HostSelector {
    cursors: DashMap<String, AtomicUsize>,
}

impl HostSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, group: &str, candidates: &[Host]) -> Option<Host> {
        if candidates.is_empty() {
            return None;
        }
        let cursor = self
            .cursors
            .entry(group.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let n = cursor.fetch_add(1, Ordering::Relaxed);
        Some(candidates[n % candidates.len()].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rotates() {
        let selector = HostSelector::new();
        let hosts = vec![Host::new("a:1"), Host::new("b:1")];
        let picked: Vec<_> = (0..4)
            .map(|_| selector.select("default", &hosts).unwrap())
            .collect();
        assert_eq!(picked, vec![hosts[0].clone(), hosts[1].clone(), hosts[0].clone(), hosts[1].clone()]);
        assert!(selector.select("default", &[]).is_none());
    }
}
