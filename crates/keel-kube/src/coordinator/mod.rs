//! Execution Coordinator
//!
//! Drives install, upgrade, rollback and uninstall end to end:
//! render, classify, plan, hook, apply, wait, record.
//!
//! Per release name, operations are serialized by the pending status of the
//! latest stored version. Creating that pending version goes through the
//! store's atomic `create`, so of two racing operations only one can claim
//! the next version number; the other fails fast.

mod install;
mod rollback;
mod uninstall;
mod upgrade;

use keel_core::{Chart, ReleaseOptions, Values};
use keel_engine::Renderer;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::actions::{NameGenerator, RandomNameGenerator};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::hooks::{self, Hook, HookEvent, HookExecutor};
use crate::manifest;
use crate::plan::{self, ResourcePlan};
use crate::release::{Release, ReleaseStatus};
use crate::resources::ResourceList;
use crate::storage::{ListRequest, ListResponse, Storage};

/// Output of render + classify + assemble
#[derive(Debug, Clone)]
pub struct Rendered {
    pub manifest: String,
    pub hooks: Vec<Hook>,
    pub notes: Option<String>,
}

/// How a plan is pushed to the cluster
#[derive(Debug, Clone, Copy)]
pub(crate) struct ApplySettings {
    pub force: bool,
    pub prune: bool,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
}

pub struct Coordinator<K: KubeClient, R: Renderer> {
    client: K,
    renderer: R,
    storage: Storage,
    names: Box<dyn NameGenerator>,
    /// Held while a failed operation records its outcome and rolls back
    finalize: Mutex<()>,
}

impl<K: KubeClient, R: Renderer> Coordinator<K, R> {
    pub fn new(client: K, renderer: R, storage: Storage) -> Self {
        Self {
            client,
            renderer,
            storage,
            names: Box::new(RandomNameGenerator),
            finalize: Mutex::new(()),
        }
    }

    pub fn with_name_generator(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn client(&self) -> &K {
        &self.client
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Latest version, or a specific one
    pub async fn status(&self, namespace: &str, name: &str, version: Option<u32>) -> Result<Release> {
        match version {
            Some(version) => self.storage.get(namespace, name, version).await,
            None => self.storage.last(namespace, name).await,
        }
    }

    /// Versions ascending; with `max`, only the newest `max`
    pub async fn history(&self, namespace: &str, name: &str, max: Option<usize>) -> Result<Vec<Release>> {
        self.storage.recent(namespace, name, max).await
    }

    pub async fn list(&self, request: &ListRequest) -> Result<ListResponse> {
        self.storage.list(request).await
    }

    /// Release the pending lock of a stuck operation
    pub async fn recover(&self, namespace: &str, name: &str) -> Result<Release> {
        self.storage.recover(namespace, name).await
    }

    pub(crate) fn render(
        &self,
        chart: &Chart,
        config: &Values,
        defaults: Option<&Values>,
        options: &ReleaseOptions,
    ) -> Result<Rendered> {
        render_chart(&self.renderer, chart, config, defaults, options)
    }

    /// Parse a release manifest and stamp it as owned by the release
    pub(crate) fn owned_resources(&self, release: &Release) -> Result<ResourceList> {
        let mut resources = self.client.build(&release.manifest, &release.namespace)?;
        plan::stamp_ownership(&mut resources, &release.name, &release.namespace);
        Ok(resources)
    }

    pub(crate) async fn run_hooks(
        &self,
        release: &mut Release,
        event: HookEvent,
        disabled: bool,
        timeout: Duration,
    ) -> Result<()> {
        if disabled {
            return Ok(());
        }
        HookExecutor::new(&self.client, &release.namespace)
            .with_default_timeout(timeout)
            .execute(&mut release.hooks, event)
            .await
    }

    /// Push a plan: create new, update existing, optionally prune vanished
    pub(crate) async fn apply_plan(
        &self,
        plan: &ResourcePlan,
        settings: ApplySettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::info!(plan = %plan.summary(), "applying resources");

        if !plan.created.is_empty() {
            cancellable(cancel, self.client.create(&plan.created)).await?;
        }

        let updated: Vec<_> = plan.updated.iter().map(|u| u.resource.clone()).collect();
        if !updated.is_empty() {
            cancellable(cancel, self.client.update(&updated, settings.force)).await?;
        }

        if settings.prune {
            let prunable = plan.prunable();
            let kept = plan.deleted.len() - prunable.len();
            if kept > 0 {
                tracing::info!(count = kept, "keeping resources with resource-policy: keep");
            }
            if !prunable.is_empty() {
                cancellable(cancel, self.client.delete(&prunable)).await?;
            }
        } else if !plan.deleted.is_empty() {
            tracing::info!(count = plan.deleted.len(), "leaving resources removed from the chart in place");
        }

        if settings.wait {
            let targets = plan.target_resources();
            let wait = async {
                if settings.wait_for_jobs {
                    self.client.wait_with_jobs(&targets, settings.timeout).await
                } else {
                    self.client.wait(&targets, settings.timeout).await
                }
            };
            cancellable(cancel, wait).await?;
        }

        Ok(())
    }

    /// Mark a release failed and persist it
    ///
    /// Persistence errors are logged; the original failure is what the
    /// caller reports.
    pub(crate) async fn record_failure(&self, release: &mut Release, err: &KubeError) {
        let description = match release.status() {
            ReleaseStatus::PendingInstall => format!("Install failed: {}", err),
            ReleaseStatus::PendingUpgrade => format!("Upgrade failed: {}", err),
            ReleaseStatus::PendingRollback => format!("Rollback failed: {}", err),
            _ => format!("Operation failed: {}", err),
        };
        release.set_status(ReleaseStatus::Failed, description);
        release.info.last_deployed = chrono::Utc::now();
        self.persist(release).await;
    }

    /// Best-effort update
    pub(crate) async fn persist(&self, release: &Release) {
        if let Err(err) = self.storage.update(release).await {
            tracing::warn!(
                release = %release.name,
                version = release.version,
                status = %release.status(),
                error = %err,
                "failed to record release"
            );
        }
    }

    /// Mark every other deployed version superseded, then the target deployed
    pub(crate) async fn promote(&self, release: &mut Release, description: &str) {
        match self.storage.history(&release.namespace, &release.name).await {
            Ok(history) => {
                for mut old in history {
                    if old.version != release.version && old.status() == ReleaseStatus::Deployed {
                        old.set_status(ReleaseStatus::Superseded, "Superseded by newer version");
                        self.persist(&old).await;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(release = %release.name, error = %err, "could not read history to supersede");
            }
        }

        release.set_status(ReleaseStatus::Deployed, description);
        release.info.last_deployed = chrono::Utc::now();
        self.persist(release).await;
    }
}

/// Render a chart with user config and split the output
///
/// `defaults` replaces the chart's own default values when set. Pure: no
/// cluster access and no persistence.
pub fn render_chart<R: Renderer + ?Sized>(
    renderer: &R,
    chart: &Chart,
    config: &Values,
    defaults: Option<&Values>,
    options: &ReleaseOptions,
) -> Result<Rendered> {
    let values = Values::coalesce(defaults.unwrap_or(&chart.values), config);
    let rendered = renderer.render(chart, &values, options)?;
    let (rendered, notes) = manifest::split_notes(chart.name(), rendered);
    let (hooks, plain) = hooks::classify(&rendered)?;

    Ok(Rendered {
        manifest: manifest::assemble(&plain),
        hooks,
        notes,
    })
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(KubeError::Cancelled),
        result = fut => result,
    }
}

/// Labels carried from options onto the record
pub(crate) fn merge_labels(release: &mut Release, labels: &BTreeMap<String, String>) {
    release
        .labels
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// The stored version that holds the pending lock, if any
pub(crate) fn pending_lock(history: &[Release]) -> Option<&Release> {
    history.last().filter(|r| r.is_pending())
}

pub(crate) fn operation_in_progress(release: &Release) -> KubeError {
    KubeError::OperationInProgress {
        name: release.name.clone(),
        status: release.status().to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::actions::InstallOptions;

    #[tokio::test]
    async fn test_recover_releases_pending_lock() {
        let h = harness();
        let mut release = crate::release::fixtures::release("stuck", 1, ReleaseStatus::PendingUpgrade);
        release.namespace = "default".into();
        h.coordinator.storage().create(&release).await.unwrap();

        let recovered = h.coordinator.recover("default", "stuck").await.unwrap();
        assert_eq!(recovered.status(), ReleaseStatus::Failed);
        assert!(recovered.info.description.contains("pending-upgrade"));

        assert!(matches!(
            h.coordinator.recover("default", "stuck").await,
            Err(KubeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_history_max() {
        let h = harness();
        for version in 1..=4 {
            h.coordinator
                .storage()
                .create(&crate::release::fixtures::release("web", version, ReleaseStatus::Superseded))
                .await
                .unwrap();
        }

        let versions: Vec<u32> = h
            .coordinator
            .history("default", "web", Some(2))
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![3, 4]);

        assert!(matches!(
            h.coordinator.history("default", "nope", None).await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_by_version() {
        let h = harness();
        h.coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default"))
            .await
            .unwrap();

        let latest = h.coordinator.status("default", "web", None).await.unwrap();
        assert_eq!(latest.version, 1);
        assert!(h.coordinator.status("default", "web", Some(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = cancellable(&token, async { Ok(()) }).await;
        assert!(matches!(result, Err(KubeError::Cancelled)));
    }
}
