//! Rollback

use keel_engine::Renderer;

use super::{ApplySettings, Coordinator, cancellable, operation_in_progress, pending_lock};
use crate::actions::{RollbackOptions, validate_release_name};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::hooks::HookEvent;
use crate::plan::{self, ResourcePlan};
use crate::release::{Release, ReleaseStatus};

impl<K: KubeClient, R: Renderer> Coordinator<K, R> {
    /// Restore the manifest and config of an earlier version as a new version
    pub async fn rollback(&self, options: &RollbackOptions) -> Result<Release> {
        validate_release_name(&options.name)?;
        let name = options.name.as_str();
        let namespace = options.namespace.as_str();

        let history = self.storage.history(namespace, name).await?;
        let Some(last) = history.last() else {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                version: None,
            });
        };
        if let Some(pending) = pending_lock(&history) {
            return Err(operation_in_progress(pending));
        }

        let target_version = match options.version {
            0 if history.len() < 2 => {
                return Err(KubeError::Validation(format!(
                    "release '{}' has no previous version to roll back to",
                    name
                )));
            }
            0 => history[history.len() - 2].version,
            v => v,
        };
        let source = history
            .iter()
            .find(|r| r.version == target_version)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                version: Some(target_version),
            })?;

        let version = last.version + 1;
        let description = format!("Rollback to {}", target_version);
        let mut release = Release::new(
            name,
            namespace,
            version,
            source.chart.clone(),
            source.config.clone(),
            ReleaseStatus::PendingRollback,
            description.clone(),
        );
        release.info.first_deployed = history[0].info.first_deployed;
        release.manifest = source.manifest.clone();
        release.hooks = source.hooks.clone();
        for hook in &mut release.hooks {
            hook.last_run = None;
        }
        release.info.notes = source.info.notes.clone();
        release.labels = source.labels.clone();

        if options.dry_run {
            return Ok(release);
        }

        self.client.is_reachable().await?;

        let current = history
            .iter()
            .rev()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .unwrap_or(last);
        let baseline = self.owned_resources(current)?;
        let target = self.owned_resources(&release)?;
        let plan = ResourcePlan::compute(&baseline, &target);
        tracing::info!(release = %name, from = current.version, to = target_version, version, plan = %plan.summary(), "rollback plan");

        if !options.take_ownership {
            plan::check_ownership(&self.client, &plan.created, name, namespace).await?;
        }

        self.storage.create(&release).await.map_err(|err| match err {
            KubeError::ReleaseAlreadyExists { .. } => KubeError::OperationInProgress {
                name: name.to_string(),
                status: ReleaseStatus::PendingRollback.to_string(),
            },
            other => other,
        })?;

        match self.perform_rollback(&mut release, &plan, options).await {
            Ok(()) => {
                self.promote(&mut release, &description).await;
                tracing::info!(release = %name, version, "rollback complete");
                Ok(release)
            }
            Err(err) => {
                tracing::warn!(release = %name, version, error = %err, "rollback failed");
                self.record_failure(&mut release, &err).await;
                Err(err)
            }
        }
    }

    async fn perform_rollback(
        &self,
        release: &mut Release,
        plan: &ResourcePlan,
        options: &RollbackOptions,
    ) -> Result<()> {
        self.run_hooks(release, HookEvent::PreRollback, options.disable_hooks, options.timeout)
            .await?;

        let settings = ApplySettings {
            force: options.force,
            prune: true,
            wait: options.wait,
            wait_for_jobs: options.wait_for_jobs,
            timeout: options.timeout,
        };
        self.apply_plan(plan, settings, &options.cancel).await?;

        if options.recreate {
            let workloads = plan.target_resources();
            cancellable(&options.cancel, self.client.recreate_pods(&workloads)).await?;
        }

        self.run_hooks(release, HookEvent::PostRollback, options.disable_hooks, options.timeout)
            .await
    }
}
