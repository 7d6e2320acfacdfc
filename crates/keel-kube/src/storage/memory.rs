//! In-memory storage driver
//!
//! Used by tests and by commands that must not persist anything.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::StorageDriver;
use crate::error::{KubeError, Result};
use crate::release::Release;

type Records = BTreeMap<(String, String), BTreeMap<u32, Release>>;

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct OperationCounts {
    pub gets: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub lists: AtomicUsize,
}

impl OperationCounts {
    /// Create/update/delete calls
    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cloning shares the underlying records
#[derive(Clone, Default)]
pub struct MemoryDriver {
    /// `(namespace, name) -> version -> record`
    records: Arc<RwLock<Records>>,
    counts: Arc<OperationCounts>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> &OperationCounts {
        &self.counts
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// While set, every driver call fails with a storage error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KubeError::Storage("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn not_found(name: &str, version: u32) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        version: Some(version),
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        OperationCounts::bump(&self.counts.gets);
        self.check_available()?;
        self.records
            .read()
            .await
            .get(&key(namespace, name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| not_found(name, version))
    }

    async fn create(&self, release: &Release) -> Result<()> {
        OperationCounts::bump(&self.counts.creates);
        self.check_available()?;
        let mut records = self.records.write().await;
        let versions = records.entry(key(&release.namespace, &release.name)).or_default();
        if versions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                version: release.version,
            });
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        OperationCounts::bump(&self.counts.updates);
        self.check_available()?;
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&key(&release.namespace, &release.name))
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| not_found(&release.name, release.version))?;
        *slot = release.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        OperationCounts::bump(&self.counts.deletes);
        self.check_available()?;
        let mut records = self.records.write().await;
        let versions = records
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found(name, version))?;
        let removed = versions.remove(&version).ok_or_else(|| not_found(name, version))?;
        if versions.is_empty() {
            records.remove(&key(namespace, name));
        }
        Ok(removed)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        OperationCounts::bump(&self.counts.lists);
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .flat_map(|(_, versions)| versions.values().cloned())
            .collect())
    }

    async fn query(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        OperationCounts::bump(&self.counts.lists);
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .get(&key(namespace, name))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }
}
