//! Upgrade

use keel_core::{Chart, ReleaseOptions, Values};
use keel_engine::Renderer;

use super::{ApplySettings, Coordinator, merge_labels, operation_in_progress, pending_lock};
use crate::actions::{RollbackOptions, UpgradeOptions, ValueReusePolicy, validate_release_name};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::hooks::HookEvent;
use crate::plan::{self, ResourcePlan};
use crate::release::{Release, ReleaseStatus};

/// User config to record, and chart defaults to render against (`None`: the new chart's)
fn resolve_values(policy: ValueReusePolicy, current: &Release, new: &Values) -> (Values, Option<Values>) {
    let layered = || {
        let mut config = current.config.clone();
        config.merge(new);
        config
    };

    match policy {
        ValueReusePolicy::ResetValues => (new.clone(), None),
        ValueReusePolicy::ReuseValues => (layered(), Some(current.computed_values())),
        ValueReusePolicy::ResetThenReuseValues => (layered(), None),
        ValueReusePolicy::Default if new.is_empty() && !current.config.is_empty() => {
            (current.config.clone(), None)
        }
        ValueReusePolicy::Default => (new.clone(), None),
    }
}

impl<K: KubeClient, R: Renderer> Coordinator<K, R> {
    /// Move a release to a new chart and/or values
    ///
    /// The diff is taken against the newest deployed version (or the latest
    /// failed/superseded one when nothing is deployed).
    pub async fn upgrade(&self, chart: &Chart, options: &UpgradeOptions) -> Result<Release> {
        chart.validate()?;
        validate_release_name(&options.name)?;
        let name = options.name.as_str();
        let namespace = options.namespace.as_str();

        let history = self.storage.history(namespace, name).await?;
        let no_deployed = || KubeError::NoDeployedReleases { name: name.to_string() };
        let last = history.last().ok_or_else(no_deployed)?;
        if let Some(pending) = pending_lock(&history) {
            return Err(operation_in_progress(pending));
        }
        if last.status() == ReleaseStatus::Deleted {
            return Err(no_deployed());
        }

        let current = history
            .iter()
            .rev()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .or_else(|| {
                Some(last).filter(|r| matches!(r.status(), ReleaseStatus::Failed | ReleaseStatus::Superseded))
            })
            .ok_or_else(no_deployed)?;

        let (config, defaults) = resolve_values(options.value_reuse, current, &options.values);
        let version = last.version + 1;
        let release_options = ReleaseOptions::for_upgrade(name, namespace, version);
        let rendered = self.render(chart, &config, defaults.as_ref(), &release_options)?;

        let mut release = Release::new(
            name,
            namespace,
            version,
            chart.clone(),
            config,
            ReleaseStatus::PendingUpgrade,
            "Preparing upgrade",
        );
        release.info.first_deployed = history[0].info.first_deployed;
        release.manifest = rendered.manifest;
        release.hooks = rendered.hooks;
        release.info.notes = rendered.notes;
        release.labels = current.labels.clone();
        merge_labels(&mut release, &options.labels);

        if options.dry_run {
            release.info.description = "Dry run complete".to_string();
            return Ok(release);
        }

        self.client.is_reachable().await?;

        let baseline = self.owned_resources(current)?;
        let target = self.owned_resources(&release)?;
        let plan = ResourcePlan::compute(&baseline, &target);
        tracing::info!(release = %name, from = current.version, to = version, plan = %plan.summary(), "upgrade plan");

        if !options.take_ownership {
            plan::check_ownership(&self.client, &plan.created, name, namespace).await?;
        }

        self.storage.create(&release).await.map_err(|err| match err {
            KubeError::ReleaseAlreadyExists { .. } => KubeError::OperationInProgress {
                name: name.to_string(),
                status: ReleaseStatus::PendingUpgrade.to_string(),
            },
            other => other,
        })?;

        match self.perform_upgrade(&mut release, &plan, options).await {
            Ok(()) => {
                self.promote(&mut release, options.description.as_deref().unwrap_or("Upgrade complete"))
                    .await;
                tracing::info!(release = %name, version, "upgrade complete");
                Ok(release)
            }
            Err(err) => self.fail_upgrade(release, err, options).await,
        }
    }

    async fn perform_upgrade(
        &self,
        release: &mut Release,
        plan: &ResourcePlan,
        options: &UpgradeOptions,
    ) -> Result<()> {
        self.run_hooks(release, HookEvent::PreUpgrade, options.disable_hooks, options.timeout)
            .await?;

        let settings = ApplySettings {
            force: options.force,
            prune: options.prune,
            wait: options.wait,
            wait_for_jobs: options.wait_for_jobs,
            timeout: options.timeout,
        };
        self.apply_plan(plan, settings, &options.cancel).await?;

        self.run_hooks(release, HookEvent::PostUpgrade, options.disable_hooks, options.timeout)
            .await
    }

    /// Record the failure; in atomic mode roll back to the last good version
    async fn fail_upgrade(&self, mut release: Release, err: KubeError, options: &UpgradeOptions) -> Result<Release> {
        let _finalize = self.finalize.lock().await;
        tracing::warn!(release = %release.name, version = release.version, error = %err, "upgrade failed");
        self.record_failure(&mut release, &err).await;

        if !options.atomic {
            return Err(err);
        }

        let history = match self.storage.history(&release.namespace, &release.name).await {
            Ok(history) => history,
            Err(store_err) => {
                return Err(KubeError::RollbackFailed {
                    cause: Box::new(err),
                    rollback: Box::new(store_err),
                });
            }
        };
        let Some(target) = history
            .iter()
            .rev()
            .filter(|r| r.version < release.version)
            .find(|r| matches!(r.status(), ReleaseStatus::Deployed | ReleaseStatus::Superseded))
            .map(|r| r.version)
        else {
            return Err(KubeError::RollbackFailed {
                cause: Box::new(err),
                rollback: Box::new(KubeError::NoDeployedReleases {
                    name: release.name.clone(),
                }),
            });
        };

        tracing::info!(release = %release.name, to = target, "atomic upgrade: rolling back");
        let mut rollback = RollbackOptions::new(&release.name, &release.namespace).to_version(target);
        rollback.wait = options.wait;
        rollback.wait_for_jobs = options.wait_for_jobs;
        rollback.timeout = options.timeout;
        rollback.force = options.force;
        rollback.take_ownership = options.take_ownership;
        rollback.disable_hooks = options.disable_hooks;

        match self.rollback(&rollback).await {
            Ok(restored) => Err(KubeError::RolledBack {
                cause: Box::new(err),
                outcome: format!("rolled back to version {} as version {}", target, restored.version),
            }),
            Err(rollback) => Err(KubeError::RollbackFailed {
                cause: Box::new(err),
                rollback: Box::new(rollback),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::actions::InstallOptions;
    use crate::resources::parse_manifest;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn installed(h: &Harness) -> Release {
        h.coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default"))
            .await
            .unwrap()
    }

    fn data(h: &Harness, name: &str) -> Option<String> {
        h.client
            .live_object("ConfigMap", name)
            .and_then(|o| o.pointer("/data/value").and_then(|v| v.as_str()).map(String::from))
    }

    #[tokio::test]
    async fn test_upgrade_supersedes_previous() {
        let h = harness();
        installed(&h).await;

        let release = h
            .coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default").with_values(set("data: two")),
            )
            .await
            .unwrap();

        assert_eq!(release.version, 2);
        assert_eq!(data(&h, "web-cm").as_deref(), Some("two"));
        let statuses = statuses(&h, "web").await;
        assert_eq!(
            statuses,
            vec![(1, ReleaseStatus::Superseded), (2, ReleaseStatus::Deployed)]
        );
        assert_eq!(deployed_count(&statuses), 1);
    }

    #[tokio::test]
    async fn test_versions_increase_through_failures() {
        let h = harness();
        installed(&h).await;

        h.client.fail_update("conflict");
        assert!(
            h.coordinator
                .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
                .await
                .is_err()
        );
        let release = h
            .coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
            .await
            .unwrap();

        assert_eq!(release.version, 3);
        assert_eq!(
            statuses(&h, "web").await,
            vec![
                (1, ReleaseStatus::Superseded),
                (2, ReleaseStatus::Failed),
                (3, ReleaseStatus::Deployed)
            ]
        );
    }

    #[tokio::test]
    async fn test_first_deployed_carried_forward() {
        let h = harness();
        let first = installed(&h).await;

        let upgraded = h
            .coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
            .await
            .unwrap();
        assert_eq!(upgraded.info.first_deployed, first.info.first_deployed);
    }

    #[tokio::test]
    async fn test_prune_removed_resources() {
        let h = harness();
        h.coordinator
            .install(
                &app_chart(),
                &InstallOptions::new("web", "default").with_values(set("extra: true")),
            )
            .await
            .unwrap();
        assert!(h.client.live_object("ConfigMap", "web-extra").is_some());

        h.coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default")
                    .with_values(set("extra: false"))
                    .without_prune(),
            )
            .await
            .unwrap();
        assert!(h.client.live_object("ConfigMap", "web-extra").is_some());

        // v2 no longer renders web-extra, so the v3 baseline does not hold it either
        h.coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default").with_values(set("extra: true")),
            )
            .await
            .unwrap();
        h.coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default").with_values(set("extra: false")),
            )
            .await
            .unwrap();
        assert!(h.client.live_object("ConfigMap", "web-extra").is_none());
        assert!(h.client.live_object("ConfigMap", "web-cm").is_some());
    }

    #[tokio::test]
    async fn test_prune_respects_keep_policy() {
        let h = harness();
        let chart = app_chart().with_template(
            "templates/kept.yaml",
            "{% if values.extra %}apiVersion: v1\nkind: Secret\nmetadata:\n  name: kept\n  annotations:\n    helm.sh/resource-policy: keep\n{% endif %}",
        );
        h.coordinator
            .install(&chart, &InstallOptions::new("web", "default").with_values(set("extra: true")))
            .await
            .unwrap();

        h.coordinator
            .upgrade(&chart, &UpgradeOptions::new("web", "default").with_values(set("extra: false")))
            .await
            .unwrap();

        assert!(h.client.live_object("Secret", "kept").is_some());
        assert!(h.client.live_object("ConfigMap", "web-extra").is_none());
    }

    #[tokio::test]
    async fn test_upgrade_without_release() {
        let h = harness();
        let err = h
            .coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::NoDeployedReleases { .. }));
    }

    #[tokio::test]
    async fn test_upgrade_blocked_by_pending() {
        let h = harness();
        let mut stuck = crate::release::fixtures::release("web", 1, ReleaseStatus::PendingInstall);
        stuck.namespace = "default".into();
        h.coordinator.storage().create(&stuck).await.unwrap();

        let err = h
            .coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::OperationInProgress { ref status, .. } if status == "pending-install"));
        assert_eq!(h.client.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_upgrades_one_wins() {
        let h = harness();
        installed(&h).await;
        h.client.set_apply_delay(Duration::from_millis(50));

        let options = UpgradeOptions::new("web", "default");
        let chart = app_chart();
        let (a, b) = tokio::join!(
            h.coordinator.upgrade(&chart, &options),
            h.coordinator.upgrade(&chart, &options)
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(KubeError::OperationInProgress { .. })))
        );
        let statuses = statuses(&h, "web").await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(deployed_count(&statuses), 1);
    }

    #[tokio::test]
    async fn test_atomic_upgrade_rolls_back() {
        let h = harness();
        installed(&h).await;
        h.client.fail_wait();

        let err = h
            .coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default")
                    .with_values(set("data: broken"))
                    .with_atomic(),
            )
            .await
            .unwrap_err();

        match err {
            KubeError::RolledBack { cause, outcome } => {
                assert!(matches!(*cause, KubeError::WaitTimeout { .. }));
                assert_eq!(outcome, "rolled back to version 1 as version 3");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(data(&h, "web-cm").as_deref(), Some("one"));
        let statuses = statuses(&h, "web").await;
        assert_eq!(
            statuses,
            vec![
                (1, ReleaseStatus::Superseded),
                (2, ReleaseStatus::Failed),
                (3, ReleaseStatus::Deployed)
            ]
        );
    }

    #[tokio::test]
    async fn test_atomic_upgrade_rollback_fails() {
        let h = harness();
        installed(&h).await;
        h.client.fail_wait();
        h.client.fail_wait();

        let err = h
            .coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default").with_atomic())
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::RollbackFailed { .. }));
        let statuses = statuses(&h, "web").await;
        assert_eq!(statuses.last(), Some(&(3, ReleaseStatus::Failed)));
    }

    #[tokio::test]
    async fn test_cancel_during_atomic_upgrade() {
        let h = harness();
        installed(&h).await;
        h.client.set_apply_delay(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let options = UpgradeOptions::new("web", "default")
            .with_values(set("data: two"))
            .with_atomic()
            .with_cancel(cancel.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let chart = app_chart();
        let (result, ()) = tokio::join!(h.coordinator.upgrade(&chart, &options), canceller);

        match result {
            Err(KubeError::RolledBack { cause, .. }) => assert!(matches!(*cause, KubeError::Cancelled)),
            other => panic!("unexpected result: {other:?}"),
        }
        let statuses = statuses(&h, "web").await;
        assert_eq!(statuses[1], (2, ReleaseStatus::Failed));
        assert!(deployed_count(&statuses) <= 1);
        assert_eq!(data(&h, "web-cm").as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_store_outage_does_not_hide_upgrade_failure() {
        let h = harness();
        installed(&h).await;
        h.client.set_apply_delay(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let options = UpgradeOptions::new("web", "default")
            .with_values(set("data: two"))
            .with_atomic()
            .with_cancel(cancel.clone());

        let outage = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.driver.set_unavailable(true);
            cancel.cancel();
        };
        let chart = app_chart();
        let (result, ()) = tokio::join!(h.coordinator.upgrade(&chart, &options), outage);

        match result {
            Err(KubeError::RollbackFailed { cause, rollback }) => {
                assert!(matches!(*cause, KubeError::Cancelled));
                assert!(matches!(*rollback, KubeError::Storage(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upgrade_conflicting_new_resource() {
        let h = harness();
        installed(&h).await;
        h.client.seed(
            parse_manifest(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web-extra\n",
                "default",
            )
            .unwrap(),
        );

        let err = h
            .coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default").with_values(set("extra: true")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ExistingResourceConflict { .. }));
        assert_eq!(statuses(&h, "web").await.len(), 1);

        h.coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default")
                    .with_values(set("extra: true"))
                    .with_take_ownership(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_dry_run() {
        let h = harness();
        installed(&h).await;
        let writes = h.driver.counts().writes();
        let mutations = h.client.calls().mutations();

        let release = h
            .coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default")
                    .with_values(set("data: two"))
                    .dry_run(),
            )
            .await
            .unwrap();

        assert!(release.manifest.contains("value: two"));
        assert_eq!(h.driver.counts().writes(), writes);
        assert_eq!(h.client.calls().mutations(), mutations);
    }

    #[test]
    fn test_value_reuse_policies() {
        let mut current = crate::release::fixtures::release("web", 1, ReleaseStatus::Deployed);
        current.chart = app_chart();
        current.config = set("data: old\nreplicas: 2");
        let new = set("data: new");

        let (config, defaults) = resolve_values(ValueReusePolicy::ResetValues, &current, &new);
        assert_eq!(config, new);
        assert!(defaults.is_none());

        let (config, defaults) = resolve_values(ValueReusePolicy::ReuseValues, &current, &new);
        assert_eq!(config.get("data").unwrap(), "new");
        assert_eq!(config.get("replicas").unwrap(), 2);
        assert_eq!(defaults.unwrap().get("data").unwrap(), "old");

        let (config, defaults) = resolve_values(ValueReusePolicy::ResetThenReuseValues, &current, &new);
        assert_eq!(config.get("replicas").unwrap(), 2);
        assert!(defaults.is_none());

        let (config, _) = resolve_values(ValueReusePolicy::Default, &current, &Values::new());
        assert_eq!(config, current.config);

        let (config, _) = resolve_values(ValueReusePolicy::Default, &current, &new);
        assert_eq!(config, new);
    }

    #[tokio::test]
    async fn test_default_policy_keeps_previous_values() {
        let h = harness();
        h.coordinator
            .install(
                &app_chart(),
                &InstallOptions::new("web", "default").with_values(set("data: custom")),
            )
            .await
            .unwrap();

        h.coordinator
            .upgrade(&app_chart(), &UpgradeOptions::new("web", "default"))
            .await
            .unwrap();
        assert_eq!(data(&h, "web-cm").as_deref(), Some("custom"));

        h.coordinator
            .upgrade(
                &app_chart(),
                &UpgradeOptions::new("web", "default").with_value_reuse(ValueReusePolicy::ResetValues),
            )
            .await
            .unwrap();
        assert_eq!(data(&h, "web-cm").as_deref(), Some("one"));
    }
}
