//! Kubernetes Secrets storage driver
//!
//! One Secret per release version, in the release namespace, named after
//! [`Release::storage_key`]. The payload is JSON, compressed, base64 encoded,
//! under the `release` key. Labels mirror the fields needed to select
//! records without decoding them.

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{CompressionMethod, StorageConfig, StorageDriver, decode_release, encode_release};
use crate::error::{KubeError, Result};
use crate::release::{Release, storage_key};

const SECRET_TYPE: &str = "keel.sh/release.v1";
const DATA_KEY: &str = "release";

mod labels {
    pub const OWNER: &str = "owner";
    pub const OWNER_VALUE: &str = "keel";
    pub const NAME: &str = "name";
    pub const VERSION: &str = "version";
    pub const STATUS: &str = "status";
    pub const COMPRESSION: &str = "compression";
}

pub struct SecretsDriver {
    client: Client,
    config: StorageConfig,
}

impl SecretsDriver {
    pub fn new(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    pub async fn try_default(config: StorageConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))?;
        Ok(Self::new(client, config))
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_secret(&self, release: &Release) -> Result<Secret> {
        let encoded = encode_release(release, self.config.compression)?;

        let mut data = BTreeMap::new();
        data.insert(DATA_KEY.to_string(), ByteString(encoded.into_bytes()));

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(secret_labels(release, self.config.compression)),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse_secret(&self, secret: &Secret) -> Result<Release> {
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(DATA_KEY))
            .ok_or_else(|| KubeError::Storage(format!("secret {} has no release data", secret_name(secret))))?;
        let encoded = std::str::from_utf8(&raw.0)
            .map_err(|e| KubeError::Storage(format!("invalid UTF-8 in secret: {}", e)))?;

        let compression = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::COMPRESSION))
            .and_then(|c| c.parse().ok())
            .unwrap_or(self.config.compression);

        decode_release(encoded, compression)
    }

    async fn select(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Release>> {
        let params = ListParams::default().labels(selector);
        let secrets = match namespace {
            Some(ns) => self.api(ns).list(&params).await?,
            None => Api::<Secret>::all(self.client.clone()).list(&params).await?,
        };

        let mut releases = Vec::new();
        for secret in &secrets.items {
            match self.parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(err) => {
                    tracing::warn!(secret = %secret_name(secret), error = %err, "skipping undecodable release secret");
                }
            }
        }
        Ok(releases)
    }
}

fn secret_name(secret: &Secret) -> &str {
    secret.metadata.name.as_deref().unwrap_or("<unnamed>")
}

fn secret_labels(release: &Release, compression: CompressionMethod) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::OWNER.to_string(), labels::OWNER_VALUE.to_string()),
        (labels::NAME.to_string(), release.name.clone()),
        (labels::VERSION.to_string(), release.version.to_string()),
        (labels::STATUS.to_string(), release.status().to_string()),
        (labels::COMPRESSION.to_string(), compression.to_string()),
    ])
}

fn not_found(name: &str, version: u32) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        version: Some(version),
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    fn name(&self) -> &'static str {
        "secrets"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        match self.api(namespace).get_opt(&storage_key(name, version)).await? {
            Some(secret) => self.parse_secret(&secret),
            None => Err(not_found(name, version)),
        }
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let secret = self.build_secret(release)?;
        match self.api(&release.namespace).create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                version: release.version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let api = self.api(&release.namespace);
        let key = release.storage_key();

        let existing = api
            .get_opt(&key)
            .await?
            .ok_or_else(|| not_found(&release.name, release.version))?;

        let mut secret = self.build_secret(release)?;
        secret.metadata.resource_version = existing.metadata.resource_version;

        api.replace(&key, &PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        match self
            .api(namespace)
            .delete(&storage_key(name, version), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(release),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(not_found(name, version)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        let selector = format!("{}={}", labels::OWNER, labels::OWNER_VALUE);
        self.select(namespace, &selector).await
    }

    async fn query(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let selector = format!(
            "{}={},{}={}",
            labels::OWNER,
            labels::OWNER_VALUE,
            labels::NAME,
            name
        );
        self.select(Some(namespace), &selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ReleaseStatus, fixtures};

    #[test]
    fn test_labels() {
        let release = fixtures::release("web", 3, ReleaseStatus::PendingUpgrade);
        let labels = secret_labels(&release, CompressionMethod::Zstd);

        assert_eq!(labels["owner"], "keel");
        assert_eq!(labels["name"], "web");
        assert_eq!(labels["version"], "3");
        assert_eq!(labels["status"], "pending-upgrade");
        assert_eq!(labels["compression"], "zstd");
    }
}
