//! Data exposed to templates while rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::values::Values;

/// Release-scoped options passed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOptions {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub time: DateTime<Utc>,
    pub is_install: bool,
    pub is_upgrade: bool,
    /// Always `keel`
    pub service: String,
}

impl ReleaseOptions {
    pub fn for_install(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            revision: 1,
            time: Utc::now(),
            is_install: true,
            is_upgrade: false,
            service: "keel".to_string(),
        }
    }

    pub fn for_upgrade(name: impl Into<String>, namespace: impl Into<String>, revision: u32) -> Self {
        Self {
            revision,
            is_install: false,
            is_upgrade: true,
            ..Self::for_install(name, namespace)
        }
    }
}

/// Chart fields visible as `chart.*` in templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
            description: meta.description.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kube_version: KubeVersion,
    #[serde(default)]
    pub api_versions: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            kube_version: KubeVersion::new("1.31.0"),
            api_versions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl KubeVersion {
    /// Parse `v1.31.2` or `1.31` style strings
    pub fn new(version: &str) -> Self {
        let trimmed = version.trim_start_matches('v');
        let mut parts = trimmed.split('.');
        let major = parts.next().filter(|s| !s.is_empty()).unwrap_or("1");
        let minor = parts
            .next()
            .map(|m| m.trim_end_matches('+'))
            .unwrap_or("0");

        Self {
            version: format!("v{}", trimmed),
            major: major.to_string(),
            minor: minor.to_string(),
        }
    }
}

/// Everything a single chart render sees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    pub values: JsonValue,
    pub release: ReleaseOptions,
    pub chart: ChartInfo,
    pub capabilities: Capabilities,
}

impl RenderContext {
    pub fn new(values: &Values, release: &ReleaseOptions, chart: &ChartMetadata) -> Self {
        Self {
            values: values.inner().clone(),
            release: release.clone(),
            chart: ChartInfo::from(chart),
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Context as a JSON value, ready for the template engine
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    #[test]
    fn test_render_context_json() {
        let values = Values::from_yaml("replicas: 3").unwrap();
        let release = ReleaseOptions::for_install("web", "prod");
        let chart = ChartMetadata::new("webapp", Version::new(1, 2, 3));

        let ctx = RenderContext::new(&values, &release, &chart).to_json();

        assert_eq!(ctx["values"]["replicas"], 3);
        assert_eq!(ctx["release"]["name"], "web");
        assert_eq!(ctx["release"]["isInstall"], true);
        assert_eq!(ctx["chart"]["version"], "1.2.3");
        assert_eq!(ctx["capabilities"]["kubeVersion"]["minor"], "31");
    }

    #[test]
    fn test_upgrade_options() {
        let opts = ReleaseOptions::for_upgrade("web", "prod", 4);
        assert_eq!(opts.revision, 4);
        assert!(opts.is_upgrade);
        assert!(!opts.is_install);
    }

    #[test]
    fn test_kube_version_parsing() {
        let v = KubeVersion::new("v1.29.4");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "29");
        assert_eq!(KubeVersion::new("1.30+").minor, "30");
    }
}
