//! In-memory [`KubeClient`] for tests
//!
//! Keeps applied objects in a map, records calls, and can be told to fail
//! specific operations. Injected failures on create/update/wait are queued:
//! each call to `fail_*` makes exactly one later call fail.
//!
//! `build` ignores documents that carry no `apiVersion`/`kind`, so charts
//! rendering arbitrary YAML can still be installed against it.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::client::{ApplyReport, KubeClient, display_timeout};
use crate::error::{KubeError, Result};
use crate::resources::{self, Resource, ResourceKey, ResourceList};

/// Number of calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub wait: usize,
    pub watch: usize,
    pub recreate_pods: usize,
}

impl CallCounts {
    /// Calls that change cluster state
    pub fn mutations(&self) -> usize {
        self.create + self.update + self.delete + self.recreate_pods
    }
}

#[derive(Debug, Default)]
struct Failures {
    create: VecDeque<String>,
    update: VecDeque<String>,
    delete: VecDeque<String>,
    wait: usize,
    hooks: BTreeSet<String>,
    unreachable: bool,
}

#[derive(Debug, Default)]
pub struct MockKubeClient {
    live: Mutex<BTreeMap<ResourceKey, JsonValue>>,
    calls: Mutex<CallCounts>,
    watched: Mutex<Vec<String>>,
    failures: Mutex<Failures>,
    apply_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockKubeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put objects in the cluster without recording a call
    pub fn seed(&self, resources: impl IntoIterator<Item = Resource>) {
        let mut live = lock(&self.live);
        for resource in resources {
            live.insert(resource.key, resource.object);
        }
    }

    pub fn fail_create(&self, message: &str) {
        lock(&self.failures).create.push_back(message.to_string());
    }

    pub fn fail_update(&self, message: &str) {
        lock(&self.failures).update.push_back(message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        lock(&self.failures).delete.push_back(message.to_string());
    }

    /// Next `wait`/`wait_with_jobs` call times out
    pub fn fail_wait(&self) {
        lock(&self.failures).wait += 1;
    }

    /// Every hook with this name fails to become ready
    pub fn fail_hook(&self, name: &str) {
        lock(&self.failures).hooks.insert(name.to_string());
    }

    pub fn set_unreachable(&self) {
        lock(&self.failures).unreachable = true;
    }

    /// Make create/update take this long
    pub fn set_apply_delay(&self, delay: Duration) {
        *lock(&self.apply_delay) = Some(delay);
    }

    pub fn calls(&self) -> CallCounts {
        *lock(&self.calls)
    }

    /// Names of hook objects in the order they were watched
    pub fn watched(&self) -> Vec<String> {
        lock(&self.watched).clone()
    }

    /// Sorted names of everything currently live
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.live).keys().map(|k| k.name.clone()).collect();
        names.sort();
        names
    }

    pub fn live_object(&self, kind: &str, name: &str) -> Option<JsonValue> {
        lock(&self.live)
            .iter()
            .find(|(k, _)| k.kind == kind && k.name == name)
            .map(|(_, v)| v.clone())
    }

    fn count(&self, f: impl FnOnce(&mut CallCounts)) {
        f(&mut lock(&self.calls));
    }

    async fn delay(&self) {
        let delay = *lock(&self.apply_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn store(&self, resources: &[Resource]) -> ApplyReport {
        let mut live = lock(&self.live);
        let mut report = ApplyReport::default();
        for resource in resources {
            let previous = live.insert(resource.key.clone(), resource.object.clone());
            if previous.is_some() {
                report.updated.push(resource.key.clone());
            } else {
                report.created.push(resource.key.clone());
            }
        }
        report
    }
}

#[async_trait]
impl KubeClient for MockKubeClient {
    async fn is_reachable(&self) -> Result<()> {
        if lock(&self.failures).unreachable {
            return Err(KubeError::ClusterUnreachable("mock cluster is down".to_string()));
        }
        Ok(())
    }

    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList> {
        let mut out = Vec::new();
        for (source, doc) in resources::split_documents(manifest) {
            if resources::is_comment_only(&doc) {
                continue;
            }
            let object: JsonValue = serde_yaml::from_str(&doc)?;
            if object.get("apiVersion").is_none() || object.get("kind").is_none() {
                continue;
            }
            out.push(Resource::from_object(object, namespace, source)?);
        }
        Ok(out)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<JsonValue>> {
        Ok(lock(&self.live).get(key).cloned())
    }

    async fn create(&self, resources: &[Resource]) -> Result<ApplyReport> {
        self.count(|c| c.create += 1);
        self.delay().await;
        if let Some(message) = lock(&self.failures).create.pop_front() {
            return Err(KubeError::Apply(message));
        }
        Ok(self.store(resources))
    }

    async fn update(&self, resources: &[Resource], _force: bool) -> Result<ApplyReport> {
        self.count(|c| c.update += 1);
        self.delay().await;
        if let Some(message) = lock(&self.failures).update.pop_front() {
            return Err(KubeError::Apply(message));
        }
        Ok(self.store(resources))
    }

    async fn delete(&self, resources: &[Resource]) -> Result<ApplyReport> {
        self.count(|c| c.delete += 1);
        if let Some(message) = lock(&self.failures).delete.pop_front() {
            return Err(KubeError::Apply(message));
        }
        let mut live = lock(&self.live);
        let mut report = ApplyReport::default();
        for resource in resources {
            if live.remove(&resource.key).is_some() {
                report.deleted.push(resource.key.clone());
            }
        }
        Ok(report)
    }

    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        self.count(|c| c.wait += 1);
        let mut failures = lock(&self.failures);
        if failures.wait > 0 {
            failures.wait -= 1;
            let what = resources
                .first()
                .map(|r| r.key.to_string())
                .unwrap_or_else(|| "resources".to_string());
            return Err(KubeError::WaitTimeout {
                what,
                timeout: display_timeout(timeout),
            });
        }
        Ok(())
    }

    async fn wait_with_jobs(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        self.wait(resources, timeout).await
    }

    async fn watch_until_ready(&self, resource: &Resource, _timeout: Duration) -> Result<()> {
        self.count(|c| c.watch += 1);
        lock(&self.watched).push(resource.key.name.clone());
        if lock(&self.failures).hooks.contains(&resource.key.name) {
            return Err(KubeError::Apply(format!("{} did not complete", resource.key)));
        }
        Ok(())
    }

    async fn recreate_pods(&self, _resources: &[Resource]) -> Result<()> {
        self.count(|c| c.recreate_pods += 1);
        Ok(())
    }
}
