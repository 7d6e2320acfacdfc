//! [`KubeClient`] backed by a live API server
//!
//! Resources are applied with Server-Side Apply through the dynamic API,
//! so any kind known to discovery (CRDs included) can be handled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, PropagationPolicy},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::client::{ApplyReport, KubeClient, display_timeout};
use crate::error::{KubeError, Result};
use crate::readiness::{self, Readiness, WaitMode};
use crate::resources::{self, Resource, ResourceKey};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "keel";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Workload kinds whose pods `recreate_pods` restarts
const POD_OWNER_KINDS: [&str; 3] = ["Deployment", "StatefulSet", "DaemonSet"];

pub struct ClusterClient {
    client: Client,
    /// Cached discovery; refreshed when a kind cannot be resolved
    discovery: RwLock<Discovery>,
    poll_interval: Duration,
}

impl ClusterClient {
    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))?;
        Self::new(client).await
    }

    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))?;

        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    async fn refresh_discovery(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = discovery;
        Ok(())
    }

    /// Resolve a key to its API resource, re-running discovery once on a miss
    async fn resolve(&self, key: &ResourceKey) -> Result<(ApiResource, ApiCapabilities)> {
        let (group, version) = key.group_and_version();
        let gvk = GroupVersionKind::gvk(group, version, &key.kind);

        if let Some(found) = self.discovery.read().await.resolve_gvk(&gvk) {
            return Ok(found);
        }

        tracing::debug!(kind = %key.kind, group_version = %key.group_version, "refreshing discovery");
        self.refresh_discovery().await?;

        self.discovery
            .read()
            .await
            .resolve_gvk(&gvk)
            .ok_or_else(|| KubeError::Apply(format!("unknown resource type {}/{}", key.group_version, key.kind)))
    }

    async fn api_for(&self, key: &ResourceKey) -> Result<Api<DynamicObject>> {
        let (api_resource, capabilities) = self.resolve(key).await?;
        Ok(match (capabilities.scope, key.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &api_resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &api_resource),
        })
    }

    /// Apply one resource; returns whether it was newly created
    async fn apply_one(&self, resource: &Resource, force: bool) -> Result<bool> {
        let api = self.api_for(&resource.key).await?;
        let name = resource.key.name.as_str();
        let object: DynamicObject = serde_json::from_value(resource.object.clone())?;

        let exists = api.get_opt(name).await?.is_some();

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = force;

        match api.patch(name, &params, &Patch::Apply(&object)).await {
            Ok(_) => {}
            // Immutable field change: replace the object when forced
            Err(kube::Error::Api(resp)) if force && resp.code == 422 => {
                tracing::info!(resource = %resource.key, "replacing resource with immutable changes");
                self.delete_one(resource).await?;
                api.create(&PostParams::default(), &object)
                    .await
                    .map_err(|e| KubeError::Apply(format!("failed to recreate {}: {}", resource.key, e)))?;
            }
            Err(e) => {
                return Err(KubeError::Apply(format!("failed to apply {}: {}", resource.key, e)));
            }
        }

        tracing::debug!(resource = %resource.key, created = !exists, "applied");
        Ok(!exists)
    }

    async fn apply_all(&self, resources: &[Resource], force: bool) -> Result<ApplyReport> {
        let mut ordered = resources.to_vec();
        resources::sort_for_apply(&mut ordered);

        let mut report = ApplyReport::default();
        for resource in &ordered {
            if self.apply_one(resource, force).await? {
                report.created.push(resource.key.clone());
            } else {
                report.updated.push(resource.key.clone());
            }
        }
        Ok(report)
    }

    /// Delete one resource; `false` when it was already gone
    async fn delete_one(&self, resource: &Resource) -> Result<bool> {
        let api = self.api_for(&resource.key).await?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match api.delete(&resource.key.name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(KubeError::Apply(format!("failed to delete {}: {}", resource.key, e))),
        }
    }

    /// Poll until every resource satisfies `mode`
    async fn poll_ready(&self, resources: &[&Resource], timeout: Duration, mode: WaitMode) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending: Vec<&Resource> = resources.to_vec();

        loop {
            let mut still_pending = Vec::new();
            for resource in pending {
                let state = match self.get(&resource.key).await? {
                    Some(live) => readiness::evaluate(&resource.key.kind, &live, mode),
                    None => Readiness::Pending("not found".to_string()),
                };
                match state {
                    Readiness::Ready => {}
                    Readiness::Pending(message) => {
                        tracing::debug!(resource = %resource.key, %message, "waiting");
                        still_pending.push(resource);
                    }
                    Readiness::Failed(message) => {
                        return Err(KubeError::Apply(format!("{} failed: {}", resource.key, message)));
                    }
                }
            }

            let Some(first) = still_pending.first() else {
                return Ok(());
            };
            if tokio::time::Instant::now() >= deadline {
                return Err(KubeError::WaitTimeout {
                    what: format!("{} ({} resources not ready)", first.key, still_pending.len()),
                    timeout: display_timeout(timeout),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            pending = still_pending;
        }
    }
}

/// `matchLabels` of a workload as a label selector string
fn pod_selector(object: &JsonValue) -> Option<String> {
    let labels = object.pointer("/spec/selector/matchLabels")?.as_object()?;
    let selector = labels
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join(",");
    (!selector.is_empty()).then_some(selector)
}

#[async_trait]
impl KubeClient for ClusterClient {
    async fn is_reachable(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<JsonValue>> {
        let api = self.api_for(key).await?;
        match api.get_opt(&key.name).await? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, resources: &[Resource]) -> Result<ApplyReport> {
        self.apply_all(resources, true).await
    }

    async fn update(&self, resources: &[Resource], force: bool) -> Result<ApplyReport> {
        self.apply_all(resources, force).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<ApplyReport> {
        let mut ordered = resources.to_vec();
        resources::sort_for_delete(&mut ordered);

        let mut report = ApplyReport::default();
        for resource in &ordered {
            if self.delete_one(resource).await? {
                tracing::debug!(resource = %resource.key, "deleted");
                report.deleted.push(resource.key.clone());
            }
        }
        Ok(report)
    }

    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        let all: Vec<&Resource> = resources.iter().collect();
        self.poll_ready(&all, timeout, WaitMode::Resources).await
    }

    async fn wait_with_jobs(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        let all: Vec<&Resource> = resources.iter().collect();
        self.poll_ready(&all, timeout, WaitMode::ResourcesAndJobs).await
    }

    async fn watch_until_ready(&self, resource: &Resource, timeout: Duration) -> Result<()> {
        self.poll_ready(&[resource], timeout, WaitMode::Completion).await
    }

    async fn recreate_pods(&self, resources: &[Resource]) -> Result<()> {
        for resource in resources {
            if !POD_OWNER_KINDS.contains(&resource.key.kind.as_str()) {
                continue;
            }
            let (Some(namespace), Some(selector)) =
                (resource.key.namespace.as_deref(), pod_selector(&resource.object))
            else {
                continue;
            };

            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            pods.delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
                .await?;
            tracing::info!(resource = %resource.key, %selector, "recreated pods");
        }
        Ok(())
    }
}
