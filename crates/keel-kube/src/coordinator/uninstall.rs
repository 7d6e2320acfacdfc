//! Uninstall

use keel_engine::Renderer;

use super::{Coordinator, operation_in_progress, pending_lock};
use crate::actions::{UninstallOptions, validate_release_name};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::hooks::HookEvent;
use crate::release::{Release, ReleaseStatus};
use crate::resources::sort_for_delete;

impl<K: KubeClient, R: Renderer> Coordinator<K, R> {
    /// Delete a release's resources and mark it deleted
    ///
    /// Resources annotated `resource-policy: keep` are left in place. With
    /// `purge` every stored version is removed afterwards.
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<Release> {
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

        if last.status() == ReleaseStatus::Deleted {
            if !options.purge {
                return Err(KubeError::AlreadyDeleted { name: name.to_string() });
            }
            let release = last.clone();
            if !options.dry_run {
                self.storage.purge(namespace, name).await?;
                tracing::info!(release = %name, versions = history.len(), "purged release history");
            }
            return Ok(release);
        }
        if let Some(pending) = pending_lock(&history) {
            return Err(operation_in_progress(pending));
        }

        let mut release = last.clone();
        if options.dry_run {
            return Ok(release);
        }

        self.client.is_reachable().await?;
        tracing::info!(release = %name, namespace, version = release.version, "uninstalling");

        if let Err(err) = self
            .run_hooks(&mut release, HookEvent::PreDelete, options.disable_hooks, options.timeout)
            .await
        {
            release.set_status(ReleaseStatus::Failed, format!("Uninstall failed: {}", err));
            self.persist(&release).await;
            return Err(err);
        }

        let mut resources = self.owned_resources(&release)?;
        sort_for_delete(&mut resources);
        let (kept, doomed): (Vec<_>, Vec<_>) = resources.into_iter().partition(|r| r.has_keep_policy());
        for resource in &kept {
            tracing::info!(resource = %resource.key, "keeping resource with resource-policy: keep");
        }

        let deleted = if doomed.is_empty() {
            Ok(())
        } else {
            self.client.delete(&doomed).await.map(|report| {
                tracing::debug!(count = report.deleted.len(), "deleted resources");
            })
        };

        let mut failure = deleted.err();
        if failure.is_none()
            && let Err(err) = self
                .run_hooks(&mut release, HookEvent::PostDelete, options.disable_hooks, options.timeout)
                .await
        {
            failure = Some(err);
        }

        let description = match (&failure, &options.description) {
            (Some(err), _) => format!("Uninstallation completed with errors: {}", err),
            (None, Some(description)) => description.clone(),
            (None, None) => "Uninstallation complete".to_string(),
        };
        release.set_status(ReleaseStatus::Deleted, description);
        release.info.deleted = Some(chrono::Utc::now());

        for mut other in history {
            if other.version != release.version && other.status() == ReleaseStatus::Deployed {
                other.set_status(ReleaseStatus::Superseded, "Superseded by uninstall");
                self.persist(&other).await;
            }
        }

        // A failed uninstall keeps its records even with purge
        if let Some(err) = failure {
            self.persist(&release).await;
            return Err(err);
        }
        if options.purge {
            self.storage.purge(namespace, name).await?;
            tracing::info!(release = %name, "purged release history");
        } else {
            self.storage.update(&release).await?;
        }

        tracing::info!(release = %name, "uninstall complete");
        Ok(release)
    }
}
