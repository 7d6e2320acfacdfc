//! File-based storage driver
//!
//! Layout: `<base>/<namespace>/<name>/v<version>.json`, each file holding one
//! release as JSON, compressed with the configured method.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{StorageConfig, StorageDriver, compress, decompress};
use crate::error::{KubeError, Result};
use crate::release::Release;

pub struct FileDriver {
    base_dir: PathBuf,
    config: StorageConfig,
}

impl FileDriver {
    pub fn new(base_dir: impl Into<PathBuf>, config: StorageConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, config })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn release_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }

    fn release_path(&self, namespace: &str, name: &str, version: u32) -> PathBuf {
        self.release_dir(namespace, name).join(format!("v{}.json", version))
    }

    fn encode(&self, release: &Release) -> Result<Vec<u8>> {
        let json = serde_json::to_vec_pretty(release)?;
        compress(&json, self.config.compression)
    }

    fn read_release(&self, path: &Path) -> Result<Release> {
        let data = std::fs::read(path)?;
        let json = decompress(&data, self.config.compression)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Every `v*.json` under one release directory
    fn read_dir_releases(&self, dir: &Path) -> Result<Vec<Release>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut releases = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match self.read_release(&path) {
                    Ok(release) => releases.push(release),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable release file");
                    }
                }
            }
        }
        Ok(releases)
    }

    fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

fn not_found(name: &str, version: u32) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        version: Some(version),
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let path = self.release_path(namespace, name, version);
        if !path.exists() {
            return Err(not_found(name, version));
        }
        self.read_release(&path)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = self.encode(release)?;

        // create_new gives the atomic "first writer wins" semantics
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(KubeError::ReleaseAlreadyExists {
                    name: release.name.clone(),
                    version: release.version,
                });
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data)?;
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if !path.exists() {
            return Err(not_found(&release.name, release.version));
        }
        let data = self.encode(release)?;

        // Write then rename so readers never see a torn file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        std::fs::remove_file(self.release_path(namespace, name, version))?;

        let dir = self.release_dir(namespace, name);
        if std::fs::read_dir(&dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            std::fs::remove_dir(&dir)?;
        }
        Ok(release)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        let namespaces = match namespace {
            Some(ns) => vec![self.base_dir.join(ns)],
            None => Self::subdirs(&self.base_dir)?,
        };

        let mut releases = Vec::new();
        for ns_dir in namespaces {
            for name_dir in Self::subdirs(&ns_dir)? {
                releases.extend(self.read_dir_releases(&name_dir)?);
            }
        }
        Ok(releases)
    }

    async fn query(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.read_dir_releases(&self.release_dir(namespace, name))
    }
}
