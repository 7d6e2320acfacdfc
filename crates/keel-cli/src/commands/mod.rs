//! CLI commands

pub mod history;
pub mod install;
pub mod list;
pub mod recover;
pub mod rollback;
pub mod status;
pub mod template;
pub mod uninstall;
pub mod upgrade;

use keel_engine::Engine;
use keel_kube::{ClusterClient, Coordinator, SecretsDriver, Storage, StorageConfig};
use std::time::Duration;

use crate::config::{DriverKind, Settings};
use crate::error::Result;

/// What every command gets from the global flags and config file
pub struct Context {
    pub settings: Settings,
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    /// Explicit flag, then config file, then the library default
    pub fn timeout(&self, flag: Option<Duration>) -> Option<Duration> {
        flag.or(self.settings.timeout)
    }

    /// Store only; for commands that never touch the cluster
    pub async fn storage(&self) -> Result<Storage> {
        self.settings.storage().await
    }

    /// Cluster client, renderer and store wired into a coordinator
    pub async fn coordinator(&self) -> Result<Coordinator<ClusterClient, Engine>> {
        let cluster = ClusterClient::try_default().await?;
        let storage = match self.settings.driver {
            DriverKind::Secrets => {
                let config = StorageConfig {
                    compression: self.settings.compression,
                };
                Storage::new(SecretsDriver::new(cluster.kube_client().clone(), config))
                    .with_max_history(self.settings.max_history)
            }
            DriverKind::File | DriverKind::Memory => self.settings.storage().await?,
        };
        tracing::debug!(namespace = %self.settings.namespace, "connected to cluster");
        Ok(Coordinator::new(cluster, Engine::default(), storage))
    }
}
