//! Install

use keel_core::{Chart, ReleaseOptions};
use keel_engine::Renderer;

use super::{ApplySettings, Coordinator, merge_labels, operation_in_progress, pending_lock};
use crate::actions::{InstallOptions, NAME_GENERATION_ATTEMPTS, UninstallOptions, validate_release_name};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::hooks::HookEvent;
use crate::plan::{self, ResourcePlan};
use crate::release::{Release, ReleaseStatus};

impl<K: KubeClient, R: Renderer> Coordinator<K, R> {
    /// Install a chart as a new release
    ///
    /// Returns the recorded release. With `dry_run` the release is rendered
    /// and returned but nothing is persisted or applied.
    pub async fn install(&self, chart: &Chart, options: &InstallOptions) -> Result<Release> {
        chart.validate()?;
        let (name, version) = self.claim_name(options).await?;
        let namespace = options.namespace.as_str();

        let mut release_options = ReleaseOptions::for_install(&name, namespace);
        release_options.revision = version;
        let rendered = self.render(chart, &options.values, None, &release_options)?;

        let mut release = Release::new(
            &name,
            namespace,
            version,
            chart.clone(),
            options.values.clone(),
            ReleaseStatus::PendingInstall,
            "Initial install underway",
        );
        release.manifest = rendered.manifest;
        release.hooks = rendered.hooks;
        release.info.notes = rendered.notes;
        merge_labels(&mut release, &options.labels);

        if options.dry_run {
            release.info.description = "Dry run complete".to_string();
            return Ok(release);
        }

        self.client.is_reachable().await?;

        let resources = self.owned_resources(&release)?;
        if !options.take_ownership {
            plan::check_ownership(&self.client, &resources, &name, namespace).await?;
        }

        self.storage.create(&release).await.map_err(|err| match err {
            KubeError::ReleaseAlreadyExists { name, .. } => KubeError::NameConflict { name },
            other => other,
        })?;
        tracing::info!(release = %name, namespace, version, chart = %release.chart_ref(), "installing");

        let plan = ResourcePlan::compute(&[], &resources);
        match self.perform_install(&mut release, &plan, options).await {
            Ok(()) => {
                self.promote(&mut release, options.description.as_deref().unwrap_or("Install complete"))
                    .await;
                tracing::info!(release = %name, version, "install complete");
                Ok(release)
            }
            Err(err) => self.fail_install(release, err, options).await,
        }
    }

    async fn perform_install(
        &self,
        release: &mut Release,
        plan: &ResourcePlan,
        options: &InstallOptions,
    ) -> Result<()> {
        self.run_hooks(release, HookEvent::PreInstall, options.disable_hooks, options.timeout)
            .await?;

        let settings = ApplySettings {
            force: false,
            prune: false,
            wait: options.wait,
            wait_for_jobs: options.wait_for_jobs,
            timeout: options.timeout,
        };
        self.apply_plan(plan, settings, &options.cancel).await?;

        self.run_hooks(release, HookEvent::PostInstall, options.disable_hooks, options.timeout)
            .await
    }

    /// Record the failure; in atomic mode also uninstall what was created
    async fn fail_install(&self, mut release: Release, err: KubeError, options: &InstallOptions) -> Result<Release> {
        let _finalize = self.finalize.lock().await;
        tracing::warn!(release = %release.name, error = %err, "install failed");
        self.record_failure(&mut release, &err).await;

        if !options.atomic {
            return Err(err);
        }

        tracing::info!(release = %release.name, "atomic install: uninstalling");
        let mut uninstall = UninstallOptions::new(&release.name, &release.namespace);
        uninstall.disable_hooks = options.disable_hooks;
        uninstall.timeout = options.timeout;
        match self.uninstall(&uninstall).await {
            Ok(_) => Err(KubeError::RolledBack {
                cause: Box::new(err),
                outcome: format!("release '{}' was uninstalled", release.name),
            }),
            Err(rollback) => Err(KubeError::RollbackFailed {
                cause: Box::new(err),
                rollback: Box::new(rollback),
            }),
        }
    }

    /// Pick the release name and its first version
    ///
    /// An explicit name must be free, or with `replace` belong to a deleted
    /// or failed release (the new record takes the next version).
    async fn claim_name(&self, options: &InstallOptions) -> Result<(String, u32)> {
        let namespace = options.namespace.as_str();

        if let Some(name) = &options.name {
            validate_release_name(name)?;
            let history = self.storage.history(namespace, name).await?;
            if let Some(pending) = pending_lock(&history) {
                return Err(operation_in_progress(pending));
            }
            return match history.last() {
                None => Ok((name.clone(), 1)),
                Some(last)
                    if options.replace
                        && matches!(last.status(), ReleaseStatus::Deleted | ReleaseStatus::Failed) =>
                {
                    Ok((name.clone(), last.version + 1))
                }
                Some(_) => Err(KubeError::NameConflict { name: name.clone() }),
            };
        }

        for _ in 0..NAME_GENERATION_ATTEMPTS {
            let candidate = self.names.generate();
            if validate_release_name(&candidate).is_err() {
                continue;
            }
            if self.storage.history(namespace, &candidate).await?.is_empty() {
                return Ok((candidate, 1));
            }
            tracing::debug!(name = %candidate, "generated name taken");
        }
        Err(KubeError::NameGenerationExhausted {
            attempts: NAME_GENERATION_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::actions::NameGenerator;
    use crate::plan::stamp_ownership;
    use crate::resources::parse_manifest;
    use keel_core::ChartMetadata;
    use semver::Version;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_install_plain_chart() {
        let h = harness();

        let release = h
            .coordinator
            .install(&hello_chart(), &InstallOptions::new("hello", "spaced"))
            .await
            .unwrap();

        assert_eq!(release.namespace, "spaced");
        assert_eq!(release.version, 1);
        assert!(release.manifest.contains("# Source: hello/hello"));
        assert_eq!(release.status(), ReleaseStatus::Deployed);

        let stored = h.coordinator.status("spaced", "hello", None).await.unwrap();
        assert_eq!(stored.status(), ReleaseStatus::Deployed);
        assert_eq!(stored.info.description, "Install complete");
    }

    #[tokio::test]
    async fn test_install_with_hook() {
        let h = harness();
        let chart = Chart::new(ChartMetadata::new("hello", Version::new(0, 1, 0)))
            .with_template("hello", "hello: world\n")
            .with_template(
                "hooks",
                "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: setup\n  annotations:\n    helm.sh/hook: post-install,pre-delete\n",
            );

        let release = h
            .coordinator
            .install(&chart, &InstallOptions::new("hooked", "default"))
            .await
            .unwrap();

        assert_eq!(release.hooks.len(), 1);
        assert_eq!(release.hooks[0].events, vec![HookEvent::PostInstall, HookEvent::PreDelete]);
        assert!(!release.manifest.contains("hello/hooks"));
        assert!(release.hooks[0].last_run.is_some());
        assert_eq!(h.client.watched(), vec!["setup"]);
    }

    #[tokio::test]
    async fn test_dry_run_is_pure() {
        let h = harness();

        let release = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default").dry_run())
            .await
            .unwrap();

        assert_eq!(release.status(), ReleaseStatus::PendingInstall);
        assert!(release.manifest.contains("web-cm"));
        assert_eq!(h.driver.counts().writes(), 0);
        assert_eq!(h.client.calls().mutations(), 0);
        assert!(h.driver.is_empty().await);
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let h = harness();
        let options = InstallOptions::new("web", "default");
        h.coordinator.install(&app_chart(), &options).await.unwrap();

        let err = h.coordinator.install(&app_chart(), &options).await.unwrap_err();
        assert!(matches!(err, KubeError::NameConflict { ref name } if name == "web"));
    }

    #[tokio::test]
    async fn test_replace_failed_release() {
        let h = harness();
        h.client.fail_create("quota exceeded");
        let options = InstallOptions::new("web", "default");
        assert!(h.coordinator.install(&app_chart(), &options).await.is_err());

        let release = h
            .coordinator
            .install(&app_chart(), &options.clone().with_replace())
            .await
            .unwrap();
        assert_eq!(release.version, 2);
        assert_eq!(
            statuses(&h, "web").await,
            vec![(1, ReleaseStatus::Failed), (2, ReleaseStatus::Deployed)]
        );
    }

    #[tokio::test]
    async fn test_apply_failure_is_recorded() {
        let h = harness();
        h.client.fail_create("admission webhook denied");

        let err = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Apply(_)));

        let stored = h.coordinator.status("default", "web", None).await.unwrap();
        assert_eq!(stored.status(), ReleaseStatus::Failed);
        assert!(stored.info.description.contains("admission webhook denied"));
    }

    #[tokio::test]
    async fn test_pre_install_hook_failure_stops_before_apply() {
        let h = harness();
        h.client.fail_hook("migrate");
        let chart = app_chart().with_template(
            "templates/hook.yaml",
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  annotations:\n    keel.sh/hook: pre-install\n",
        );

        let err = h
            .coordinator
            .install(&chart, &InstallOptions::new("web", "default"))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::HookFailed { ref hook, .. } if hook == "migrate"));
        assert!(h.client.live_object("ConfigMap", "web-cm").is_none());
        assert_eq!(statuses(&h, "web").await, vec![(1, ReleaseStatus::Failed)]);
    }

    #[tokio::test]
    async fn test_wait_timeout_fails_install() {
        let h = harness();
        h.client.fail_wait();

        let err = h
            .coordinator
            .install(
                &app_chart(),
                &InstallOptions::new("web", "default").with_wait(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::WaitTimeout { .. }));
        assert_eq!(statuses(&h, "web").await, vec![(1, ReleaseStatus::Failed)]);
    }

    #[tokio::test]
    async fn test_atomic_install_uninstalls() {
        let h = harness();
        h.client.fail_wait();

        let err = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default").with_atomic())
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::RolledBack { ref cause, .. } if matches!(**cause, KubeError::WaitTimeout { .. })));
        assert!(h.client.live_object("ConfigMap", "web-cm").is_none());
        assert_eq!(statuses(&h, "web").await, vec![(1, ReleaseStatus::Deleted)]);
    }

    #[tokio::test]
    async fn test_existing_resource_conflict() {
        let h = harness();
        let mut foreign = parse_manifest(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web-cm\n",
            "default",
        )
        .unwrap();
        stamp_ownership(&mut foreign, "someone-else", "default");
        h.client.seed(foreign);

        let err = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ExistingResourceConflict { .. }));
        assert!(h.driver.is_empty().await);

        let release = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default").with_take_ownership())
            .await
            .unwrap();
        assert_eq!(release.status(), ReleaseStatus::Deployed);

        let live = h.client.live_object("ConfigMap", "web-cm").unwrap();
        assert_eq!(live.pointer("/metadata/annotations/keel.sh~1release-name").unwrap(), "web");
    }

    struct FixedNames(Mutex<Vec<&'static str>>);

    impl NameGenerator for FixedNames {
        fn generate(&self) -> String {
            let mut names = self.0.lock().unwrap();
            if names.len() > 1 {
                names.remove(0).to_string()
            } else {
                names[0].to_string()
            }
        }
    }

    #[tokio::test]
    async fn test_generated_name_skips_taken() {
        let mut h = harness();
        h.coordinator = h
            .coordinator
            .with_name_generator(FixedNames(Mutex::new(vec!["taken-name", "free-name"])));
        h.coordinator
            .install(&app_chart(), &InstallOptions::new("taken-name", "default"))
            .await
            .unwrap();

        let release = h
            .coordinator
            .install(&app_chart(), &InstallOptions::generated("default"))
            .await
            .unwrap();
        assert_eq!(release.name, "free-name");
    }

    #[tokio::test]
    async fn test_name_generation_exhausted() {
        let mut h = harness();
        h.coordinator = h
            .coordinator
            .with_name_generator(FixedNames(Mutex::new(vec!["always-same"])));
        h.coordinator
            .install(&app_chart(), &InstallOptions::new("always-same", "default"))
            .await
            .unwrap();

        let err = h
            .coordinator
            .install(&app_chart(), &InstallOptions::generated("default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::NameGenerationExhausted { attempts: 5 }));
    }

    #[tokio::test]
    async fn test_render_error_touches_nothing() {
        let h = harness();
        let chart = app_chart().with_template("templates/bad.yaml", "value: {{ values.nope.deeper }}");

        let err = h
            .coordinator
            .install(&chart, &InstallOptions::new("web", "default"))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Render(_)));
        assert!(h.driver.is_empty().await);
        assert_eq!(h.client.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_apply() {
        let h = harness();
        h.client.set_apply_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let options = InstallOptions::new("web", "default").with_cancel(cancel.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let chart = app_chart();
        let (result, ()) = tokio::join!(h.coordinator.install(&chart, &options), canceller);

        assert!(matches!(result, Err(KubeError::Cancelled)));
        assert_eq!(statuses(&h, "web").await, vec![(1, ReleaseStatus::Failed)]);
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let h = harness();
        h.client.set_unreachable();

        let err = h
            .coordinator
            .install(&app_chart(), &InstallOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ClusterUnreachable(_)));
        assert!(h.driver.is_empty().await);
    }

    #[tokio::test]
    async fn test_notes_kept_out_of_manifest() {
        let h = harness();
        let chart = app_chart().with_template("templates/NOTES.txt", "Thanks for installing {{ release.name }}");

        let release = h
            .coordinator
            .install(&chart, &InstallOptions::new("web", "default"))
            .await
            .unwrap();

        assert_eq!(release.info.notes.as_deref(), Some("Thanks for installing web"));
        assert!(!release.manifest.contains("NOTES"));
    }
}
