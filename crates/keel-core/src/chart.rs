//! Chart definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Chart API versions this crate understands
pub const SUPPORTED_API_VERSIONS: &[&str] = &["v1", "v2", "keel/v1"];

/// Name of the chart metadata file
pub const CHART_FILE: &str = "Chart.yaml";

/// Name of the default values file
pub const VALUES_FILE: &str = "values.yaml";

/// An in-memory chart: metadata, templates, default values and sub-charts
///
/// A chart is immutable once loaded. Sub-charts form a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    /// Contents of `Chart.yaml`
    pub metadata: ChartMetadata,

    /// Template files, paths relative to the chart root (`templates/service.yaml`)
    #[serde(default)]
    pub templates: Vec<TemplateFile>,

    /// Default values from `values.yaml`
    #[serde(default)]
    pub values: Values,

    /// Sub-charts loaded from `charts/`
    #[serde(default)]
    pub dependencies: Vec<Chart>,
}

/// Chart metadata (`Chart.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default)]
    pub description: Option<String>,

    /// Version of the application shipped by this chart
    #[serde(default)]
    pub app_version: Option<String>,

    /// Kubernetes version constraint
    #[serde(default)]
    pub kube_version: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub maintainers: Vec<Maintainer>,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

impl ChartMetadata {
    /// Minimal metadata with a name and version
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            api_version: default_api_version(),
            name: name.into(),
            version,
            description: None,
            app_version: None,
            kube_version: None,
            keywords: Vec::new(),
            maintainers: Vec::new(),
            dependencies: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Maintainer information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A dependency declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    /// Version constraint (resolution happens outside this crate)
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub repository: String,

    /// Dot-path into the parent values, e.g. `redis.enabled`
    #[serde(default)]
    pub condition: Option<String>,

    /// Alias name (overrides dependency name when scoping values)
    #[serde(default)]
    pub alias: Option<String>,
}

impl ChartDependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Check whether this dependency is enabled for the given parent values
    ///
    /// A dependency without a condition is always enabled.
    pub fn is_enabled(&self, values: &serde_json::Value) -> bool {
        match &self.condition {
            Some(condition) => evaluate_condition(condition, values),
            None => true,
        }
    }
}

/// Evaluate a simple dot-path condition against values
///
/// Returns `true` if the path exists and is truthy.
fn evaluate_condition(condition: &str, values: &serde_json::Value) -> bool {
    let mut current = values;
    for part in condition.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return false,
        }
    }

    match current {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// A single template file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFile {
    /// Path relative to the chart root
    pub path: String,

    /// Raw template bytes
    #[serde(with = "bytes_serde")]
    pub data: Vec<u8>,
}

impl TemplateFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// File name component of the path
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Partials (`_helpers.tpl`) are includable but never rendered on their own
    pub fn is_partial(&self) -> bool {
        self.file_name().starts_with('_')
    }
}

impl Chart {
    /// Create a chart from metadata with no templates
    pub fn new(metadata: ChartMetadata) -> Self {
        Self {
            metadata,
            templates: Vec::new(),
            values: Values::new(),
            dependencies: Vec::new(),
        }
    }

    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Add a template (builder style)
    pub fn with_template(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.templates.push(TemplateFile::new(path, data));
        self
    }

    /// Set default values (builder style)
    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Add a sub-chart (builder style)
    pub fn with_dependency(mut self, chart: Chart) -> Self {
        self.dependencies.push(chart);
        self
    }

    /// Structural validation performed before any release operation
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.trim().is_empty() {
            return Err(CoreError::MissingField {
                field: "name".to_string(),
            });
        }

        if !SUPPORTED_API_VERSIONS.contains(&self.metadata.api_version.as_str()) {
            return Err(CoreError::InvalidChart {
                message: format!(
                    "unsupported API version '{}' in chart '{}'",
                    self.metadata.api_version, self.metadata.name
                ),
            });
        }

        if self.templates.is_empty() && self.dependencies.is_empty() {
            return Err(CoreError::InvalidChart {
                message: format!("chart '{}' has no templates", self.metadata.name),
            });
        }

        for dependency in &self.dependencies {
            dependency.validate_metadata()?;
        }

        Ok(())
    }

    fn validate_metadata(&self) -> Result<()> {
        if self.metadata.name.trim().is_empty() {
            return Err(CoreError::MissingField {
                field: "name".to_string(),
            });
        }
        for dependency in &self.dependencies {
            dependency.validate_metadata()?;
        }
        Ok(())
    }

    /// Find the declaration for a loaded sub-chart, if the parent declares one
    pub fn dependency_declaration(&self, sub_chart: &str) -> Option<&ChartDependency> {
        self.metadata
            .dependencies
            .iter()
            .find(|d| d.name == sub_chart || d.alias.as_deref() == Some(sub_chart))
    }

    /// Load a chart from a directory
    ///
    /// Layout: `Chart.yaml`, optional `values.yaml`, `templates/**`, `charts/<sub>/`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join(CHART_FILE);
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("{} not found in {}", CHART_FILE, root.display()),
            });
        }
        let metadata: ChartMetadata = serde_yaml::from_str(&std::fs::read_to_string(&chart_file)?)?;

        let values_path = root.join(VALUES_FILE);
        let values = if values_path.exists() {
            Values::from_file(&values_path)?
        } else {
            Values::new()
        };

        let mut templates = Vec::new();
        let templates_dir = root.join("templates");
        if templates_dir.is_dir() {
            for entry in walkdir::WalkDir::new(&templates_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let file = entry.path();
                if !file.is_file() {
                    continue;
                }
                let relative = file.strip_prefix(root).unwrap_or(file);
                let path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                templates.push(TemplateFile::new(path, std::fs::read(file)?));
            }
        }

        let mut dependencies = Vec::new();
        let charts_dir = root.join("charts");
        if charts_dir.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(&charts_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            entries.sort();
            for sub in entries {
                dependencies.push(Chart::load(&sub)?);
            }
        }

        Ok(Self {
            metadata,
            templates,
            values,
            dependencies,
        })
    }
}

/// Serialization helper for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Template bytes are stored as base64 so chart snapshots stay compact in JSON
mod bytes_serde {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
