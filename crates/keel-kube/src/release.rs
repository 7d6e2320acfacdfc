//! Release records and their status machine

use chrono::{DateTime, Duration, Utc};
use keel_core::{Chart, Values};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::hooks::Hook;

/// Default age after which a pending release is considered stuck
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::minutes(5);

/// One version of a named release
///
/// Records are append-only per version: once a newer version exists, an older
/// record only ever changes status (to `superseded` or `deleted`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,

    /// Strictly increasing per name, starting at 1
    pub version: u32,

    /// Exact chart used for this version
    pub chart: Chart,

    /// User-supplied configuration (before coalescing with chart defaults)
    #[serde(default)]
    pub config: Values,

    /// Assembled multi-document manifest (hooks excluded)
    #[serde(default)]
    pub manifest: String,

    #[serde(default)]
    pub hooks: Vec<Hook>,

    pub info: ReleaseInfo,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Release status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    pub const ALL: [ReleaseStatus; 8] = [
        ReleaseStatus::Unknown,
        ReleaseStatus::Deployed,
        ReleaseStatus::Deleted,
        ReleaseStatus::Superseded,
        ReleaseStatus::Failed,
        ReleaseStatus::PendingInstall,
        ReleaseStatus::PendingUpgrade,
        ReleaseStatus::PendingRollback,
    ];

    /// Pending statuses act as the per-name advisory lock
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Unknown => "unknown",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Deleted => "deleted",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReleaseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown release status '{}'", s))
    }
}

impl Release {
    /// A fresh record in the given status, with both deploy timestamps at `now`
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        version: u32,
        chart: Chart,
        config: Values,
        status: ReleaseStatus,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version,
            chart,
            config,
            manifest: String::new(),
            hooks: Vec::new(),
            info: ReleaseInfo {
                first_deployed: now,
                last_deployed: now,
                deleted: None,
                description: description.into(),
                status,
                notes: None,
            },
            labels: BTreeMap::new(),
        }
    }

    /// Storage key: `keel.release.v1.<name>.v<version>`
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }

    pub fn status(&self) -> ReleaseStatus {
        self.info.status
    }

    pub fn is_pending(&self) -> bool {
        self.info.status.is_pending()
    }

    /// Pending for longer than `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.is_pending() && Utc::now() - self.info.last_deployed > timeout
    }

    pub fn set_status(&mut self, status: ReleaseStatus, description: impl Into<String>) {
        self.info.status = status;
        self.info.description = description.into();
    }

    /// Chart defaults coalesced with the stored config
    pub fn computed_values(&self) -> Values {
        Values::coalesce(&self.chart.values, &self.config)
    }

    pub fn chart_name(&self) -> &str {
        self.chart.name()
    }

    /// `<chart>-<version>`
    pub fn chart_ref(&self) -> String {
        format!("{}-{}", self.chart.metadata.name, self.chart.metadata.version)
    }
}

pub fn storage_key(name: &str, version: u32) -> String {
    format!("keel.release.v1.{}.v{}", name, version)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use keel_core::ChartMetadata;
    use semver::Version;

    pub fn chart(name: &str) -> Chart {
        Chart::new(ChartMetadata::new(name, Version::new(0, 1, 0)))
            .with_template("templates/cm.yaml", "kind: ConfigMap")
    }

    pub fn release(name: &str, version: u32, status: ReleaseStatus) -> Release {
        Release::new(
            name,
            "default",
            version,
            chart("demo"),
            Values::new(),
            status,
            "test",
        )
    }
}
