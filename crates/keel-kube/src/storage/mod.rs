//! Release Store
//!
//! Persistence is split in two layers:
//! - a [`StorageDriver`] backend that only knows how to keep records
//!   (`MemoryDriver`, `FileDriver`, `SecretsDriver`);
//! - [`Storage`], which implements lookups (`last`, `deployed`, `history`),
//!   listing and history pruning on top of any driver.
//!
//! `create` must fail when `(name, version)` already exists. That conflict is
//! the mutual exclusion between two operations racing on the same release:
//! the loser of the create sees `ReleaseAlreadyExists`.

mod file;
mod list;
mod memory;
mod secrets;

pub use file::FileDriver;
pub use list::{ListRequest, ListResponse, SortBy, SortOrder, DEFAULT_LIST_LIMIT};
pub use memory::{MemoryDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use base64::Engine as _;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::release::{Release, ReleaseStatus};

/// Storage backend capability
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Short backend name, for logs
    fn name(&self) -> &'static str;

    /// Fails with `ReleaseNotFound`
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Fails with `ReleaseAlreadyExists` when `(name, version)` is taken
    async fn create(&self, release: &Release) -> Result<()>;

    /// Overwrite an existing record; fails with `ReleaseNotFound`
    async fn update(&self, release: &Release) -> Result<()>;

    /// Remove one record and return it
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Every record, all versions, optionally limited to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>>;

    /// Every version of one release; empty when unknown
    async fn query(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;
}

/// Compression applied to serialized releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    None,
    Gzip {
        level: u32,
    },
    #[default]
    Zstd,
}

const ZSTD_LEVEL: i32 = 3;
const GZIP_LEVEL: u32 = 6;

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Gzip { .. } => "gzip",
            CompressionMethod::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionMethod::None),
            "gzip" => Ok(CompressionMethod::Gzip { level: GZIP_LEVEL }),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(format!("unknown compression '{}', expected none, gzip or zstd", other)),
        }
    }
}

/// Settings shared by the persistent drivers
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub compression: CompressionMethod,
}

pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder.finish().map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd => zstd::encode_all(std::io::Cursor::new(data), ZSTD_LEVEL)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(out)
        }
        CompressionMethod::Zstd => {
            zstd::decode_all(std::io::Cursor::new(data)).map_err(|e| KubeError::Compression(e.to_string()))
        }
    }
}

/// JSON, compressed, base64
pub fn encode_release(release: &Release, compression: CompressionMethod) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let compressed = compress(&json, compression)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

pub fn decode_release(data: &str, compression: CompressionMethod) -> Result<Release> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let json = decompress(&raw, compression)?;
    Ok(serde_json::from_slice(&json)?)
}

/// The Release Store contract over a pluggable driver
#[derive(Clone)]
pub struct Storage {
    driver: Arc<dyn StorageDriver>,
    /// Maximum number of versions kept per release; `None` keeps everything
    max_history: Option<usize>,
}

impl Storage {
    pub fn new(driver: impl StorageDriver + 'static) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    pub fn from_arc(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            max_history: None,
        }
    }

    /// `Some(0)` is treated as unlimited
    pub fn with_max_history(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history.filter(|&n| n > 0);
        self
    }

    pub fn max_history(&self) -> Option<usize> {
        self.max_history
    }

    pub fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }

    pub async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.driver.get(namespace, name, version).await
    }

    /// Persist a new version, then prune history
    pub async fn create(&self, release: &Release) -> Result<()> {
        tracing::debug!(release = %release.name, version = release.version, status = %release.status(), "creating release record");
        self.driver.create(release).await?;
        self.prune(&release.namespace, &release.name).await;
        Ok(())
    }

    /// Overwrite an existing version, then prune history
    pub async fn update(&self, release: &Release) -> Result<()> {
        tracing::debug!(release = %release.name, version = release.version, status = %release.status(), "updating release record");
        self.driver.update(release).await?;
        self.prune(&release.namespace, &release.name).await;
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.driver.delete(namespace, name, version).await
    }

    /// Remove every stored version of a release
    pub async fn purge(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut removed = Vec::new();
        for release in self.driver.query(namespace, name).await? {
            removed.push(self.driver.delete(namespace, name, release.version).await?);
        }
        Ok(removed)
    }

    /// All versions, ascending
    pub async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut releases = self.driver.query(namespace, name).await?;
        releases.sort_by_key(|r| r.version);
        Ok(releases)
    }

    /// Highest version
    pub async fn last(&self, namespace: &str, name: &str) -> Result<Release> {
        self.driver
            .query(namespace, name)
            .await?
            .into_iter()
            .max_by_key(|r| r.version)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                version: None,
            })
    }

    /// The single `DEPLOYED` version
    ///
    /// Should more than one be found, the newest wins.
    pub async fn deployed(&self, namespace: &str, name: &str) -> Result<Release> {
        self.driver
            .query(namespace, name)
            .await?
            .into_iter()
            .filter(|r| r.status() == ReleaseStatus::Deployed)
            .max_by_key(|r| r.version)
            .ok_or_else(|| KubeError::NoDeployedReleases {
                name: name.to_string(),
            })
    }

    /// Versions ascending; with `max`, only the newest `max`
    ///
    /// Unlike [`Storage::history`], an unknown release is an error.
    pub async fn recent(&self, namespace: &str, name: &str, max: Option<usize>) -> Result<Vec<Release>> {
        let mut history = self.history(namespace, name).await?;
        if history.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                version: None,
            });
        }
        if let Some(max) = max.filter(|&m| m > 0 && m < history.len()) {
            history.drain(..history.len() - max);
        }
        Ok(history)
    }

    /// Mark a stuck pending latest version failed
    ///
    /// This is the operator escape hatch for the pending lock.
    pub async fn recover(&self, namespace: &str, name: &str) -> Result<Release> {
        let mut release = self.last(namespace, name).await?;
        if !release.is_pending() {
            return Err(KubeError::Validation(format!(
                "release '{}' is not pending (status: {})",
                name,
                release.status()
            )));
        }

        let previous = release.status();
        release.set_status(
            ReleaseStatus::Failed,
            format!("Recovered from stuck {} state", previous),
        );
        self.driver.update(&release).await?;
        tracing::info!(release = %name, version = release.version, from = %previous, "recovered pending release");
        Ok(release)
    }

    /// Latest version of each release matching the request
    pub async fn list(&self, request: &ListRequest) -> Result<ListResponse> {
        let releases = self.driver.list(request.namespace.as_deref()).await?;
        request.apply(releases)
    }

    /// Evict the oldest superseded/failed/deleted versions beyond `max_history`
    ///
    /// The latest version, any deployed version and any pending version are
    /// never evicted. Failures are logged and otherwise ignored.
    async fn prune(&self, namespace: &str, name: &str) {
        let Some(max) = self.max_history else {
            return;
        };

        let history = match self.history(namespace, name).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(release = %name, error = %err, "could not read history for pruning");
                return;
            }
        };
        if history.len() <= max {
            return;
        }

        let latest = history.last().map(|r| r.version).unwrap_or_default();
        let mut excess = history.len() - max;

        for release in &history {
            if excess == 0 {
                break;
            }
            let evictable = release.version != latest
                && matches!(
                    release.status(),
                    ReleaseStatus::Superseded | ReleaseStatus::Failed | ReleaseStatus::Deleted
                );
            if !evictable {
                continue;
            }
            match self.driver.delete(namespace, name, release.version).await {
                Ok(_) => {
                    tracing::debug!(release = %name, version = release.version, "pruned old release");
                    excess -= 1;
                }
                Err(err) => {
                    tracing::warn!(release = %name, version = release.version, error = %err, "failed to prune release");
                }
            }
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("driver", &self.driver.name())
            .field("max_history", &self.max_history)
            .finish()
    }
}
