//! The cluster client seam
//!
//! Everything the coordinator and the hook executor need from a cluster goes
//! through [`KubeClient`]. [`crate::cluster::ClusterClient`] talks to a real
//! API server; [`crate::mock::MockKubeClient`] keeps state in memory.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::Result;
use crate::resources::{self, Resource, ResourceKey, ResourceList};

/// What an apply or delete call actually touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: Vec<ResourceKey>,
    pub updated: Vec<ResourceKey>,
    pub deleted: Vec<ResourceKey>,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fail with `ClusterUnreachable` when the cluster cannot be contacted
    async fn is_reachable(&self) -> Result<()>;

    /// Parse a manifest into resources, defaulting namespaced kinds to `namespace`
    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList> {
        resources::parse_manifest(manifest, namespace)
    }

    /// Current live object, if any
    async fn get(&self, key: &ResourceKey) -> Result<Option<JsonValue>>;

    /// Create resources; existing ones are applied over
    async fn create(&self, resources: &[Resource]) -> Result<ApplyReport>;

    /// Bring resources to the given state
    ///
    /// With `force`, conflicting fields are taken over (or the object is
    /// replaced when the server rejects the change).
    async fn update(&self, resources: &[Resource], force: bool) -> Result<ApplyReport>;

    /// Delete resources; missing ones are skipped
    async fn delete(&self, resources: &[Resource]) -> Result<ApplyReport>;

    /// Wait until every resource is ready, Jobs excluded
    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()>;

    /// Wait until every resource is ready and every Job has completed
    async fn wait_with_jobs(&self, resources: &[Resource], timeout: Duration) -> Result<()>;

    /// Wait for a single hook object to run to completion
    async fn watch_until_ready(&self, resource: &Resource, timeout: Duration) -> Result<()>;

    /// Delete the pods owned by workload resources so they are recreated
    async fn recreate_pods(&self, resources: &[Resource]) -> Result<()>;
}

#[async_trait]
impl<K: KubeClient + ?Sized> KubeClient for std::sync::Arc<K> {
    async fn is_reachable(&self) -> Result<()> {
        (**self).is_reachable().await
    }

    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList> {
        (**self).build(manifest, namespace)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<JsonValue>> {
        (**self).get(key).await
    }

    async fn create(&self, resources: &[Resource]) -> Result<ApplyReport> {
        (**self).create(resources).await
    }

    async fn update(&self, resources: &[Resource], force: bool) -> Result<ApplyReport> {
        (**self).update(resources, force).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<ApplyReport> {
        (**self).delete(resources).await
    }

    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        (**self).wait(resources, timeout).await
    }

    async fn wait_with_jobs(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        (**self).wait_with_jobs(resources, timeout).await
    }

    async fn watch_until_ready(&self, resource: &Resource, timeout: Duration) -> Result<()> {
        (**self).watch_until_ready(resource, timeout).await
    }

    async fn recreate_pods(&self, resources: &[Resource]) -> Result<()> {
        (**self).recreate_pods(resources).await
    }
}

/// Human form of a wait timeout, as used in `WaitTimeout` errors
pub(crate) fn display_timeout(timeout: Duration) -> String {
    humantime_serde::re::humantime::format_duration(timeout).to_string()
}
