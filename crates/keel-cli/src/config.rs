//! CLI configuration
//!
//! Settings come from three layers, later wins:
//! `~/.config/keel/config.yaml`, environment variables, global flags.
//! The last two are merged by clap (`env` fallback on each flag).

use clap::ValueEnum;
use keel_kube::{
    CompressionMethod, FileDriver, MemoryDriver, SecretsDriver, Storage, StorageConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};

/// Where release records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Kubernetes Secrets in the release namespace
    Secrets,
    /// JSON files under the data directory
    File,
    /// Process memory (records vanish on exit)
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSection {
    pub driver: Option<DriverKind>,
    pub path: Option<PathBuf>,
    pub compression: Option<String>,
}

/// Contents of `config.yaml`; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub namespace: Option<String>,
    pub storage: StorageSection,
    pub max_history: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ConfigFile {
    /// `~/.config/keel/config.yaml` (platform config dir)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("keel").join("config.yaml"))
    }

    /// Read a config file; a missing default file is an empty config
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| CliError::config(format!("cannot read {}: {}", path.display(), e)))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text)
            .map_err(|e| CliError::config(format!("invalid {}: {}", path.display(), e)))
    }
}

/// Flag/env values that override the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub driver: Option<DriverKind>,
    pub data_dir: Option<PathBuf>,
    pub max_history: Option<usize>,
}

/// Effective configuration for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: String,
    pub driver: DriverKind,
    pub data_dir: PathBuf,
    pub compression: CompressionMethod,
    /// `None` or `Some(0)` keeps every version
    pub max_history: Option<usize>,
    pub timeout: Option<Duration>,
}

pub const DEFAULT_NAMESPACE: &str = "default";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keel")
        .join("releases")
}

impl Settings {
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Result<Self> {
        let compression = match file.storage.compression.as_deref() {
            Some(value) => value.parse().map_err(CliError::config)?,
            None => CompressionMethod::default(),
        };

        Ok(Self {
            namespace: overrides
                .namespace
                .or(file.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            driver: overrides
                .driver
                .or(file.storage.driver)
                .unwrap_or(DriverKind::File),
            data_dir: overrides
                .data_dir
                .or(file.storage.path)
                .unwrap_or_else(default_data_dir),
            compression,
            max_history: overrides.max_history.or(file.max_history),
            timeout: file.timeout,
        })
    }

    /// Construct the release store for the configured driver
    pub async fn storage(&self) -> Result<Storage> {
        let config = StorageConfig {
            compression: self.compression,
        };
        let storage = match self.driver {
            DriverKind::Memory => Storage::new(MemoryDriver::new()),
            DriverKind::File => Storage::new(FileDriver::new(&self.data_dir, config)?),
            DriverKind::Secrets => Storage::new(SecretsDriver::try_default(config).await?),
        };
        tracing::debug!(driver = ?self.driver, "release store ready");
        Ok(storage.with_max_history(self.max_history))
    }
}
