//! Manifest documents as addressable resources
//!
//! Parsing here is purely structural: no discovery, no cluster access.
//! Cluster-side resolution (GVK to API resource) lives in [`crate::cluster`].

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::annotations;
use crate::error::{KubeError, Result};

/// Identity of a resource: `(groupVersion, kind, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub group_version: String,
    pub kind: String,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        group_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_version: group_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// `(group, version)` split of `group_version`; core group is empty
    pub fn group_and_version(&self) -> (&str, &str) {
        match self.group_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.group_version.as_str()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A parsed manifest document
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub key: ResourceKey,
    pub object: JsonValue,
    /// `# Source:` path of the document, when known
    pub source: Option<String>,
}

impl Resource {
    /// Build from a parsed object, defaulting the namespace of namespaced kinds
    pub fn from_object(
        mut object: JsonValue,
        default_namespace: &str,
        source: Option<String>,
    ) -> Result<Self> {
        let origin = source.as_deref().unwrap_or("<manifest>").to_string();
        let parse_err = |message: &str| KubeError::ManifestParse {
            path: origin.clone(),
            message: message.to_string(),
        };

        if !object.is_object() {
            return Err(parse_err("document is not a mapping"));
        }

        let group_version = object
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| parse_err("missing apiVersion"))?
            .to_string();
        let kind = object
            .get("kind")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| parse_err("missing kind"))?
            .to_string();
        let name = object
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| parse_err("missing metadata.name"))?
            .to_string();

        let namespace = if is_cluster_scoped(&kind) {
            None
        } else {
            let ns = object
                .pointer("/metadata/namespace")
                .and_then(JsonValue::as_str)
                .unwrap_or(default_namespace)
                .to_string();
            if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
                metadata.insert("namespace".to_string(), JsonValue::String(ns.clone()));
            }
            Some(ns)
        };

        Ok(Self {
            key: ResourceKey {
                group_version,
                kind,
                namespace,
                name,
            },
            object,
            source,
        })
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        read_annotations(&self.object)
    }

    pub fn has_keep_policy(&self) -> bool {
        annotations::has_keep_policy(&self.annotations())
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let Some(root) = self.object.as_object_mut() else {
            return;
        };
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| JsonValue::Object(Default::default()));
            if !annotations.is_object() {
                *annotations = JsonValue::Object(Default::default());
            }
            if let Some(map) = annotations.as_object_mut() {
                map.insert(key.to_string(), JsonValue::String(value.to_string()));
            }
        }
    }

    /// Object as YAML (used for diffs)
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.object).unwrap_or_default()
    }
}

/// Ordered list of resources, as produced by `build`
pub type ResourceList = Vec<Resource>;

/// Read `metadata.annotations` as strings (non-string values are stringified)
pub fn read_annotations(object: &JsonValue) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/annotations")
        .and_then(JsonValue::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split multi-document YAML on `---` separator lines
///
/// Returns each document with its `# Source:` path if a header precedes it.
pub fn split_documents(text: &str) -> Vec<(Option<String>, String)> {
    let mut docs = Vec::new();
    let mut current = String::new();
    let mut source: Option<String> = None;

    let mut flush = |current: &mut String, source: &mut Option<String>| {
        if !current.trim().is_empty() {
            docs.push((source.take(), std::mem::take(current)));
        } else {
            current.clear();
        }
    };

    for line in text.lines() {
        if line == "---" || line.starts_with("--- ") {
            flush(&mut current, &mut source);
            source = None;
            continue;
        }
        if current.trim().is_empty()
            && let Some(path) = line.strip_prefix("# Source: ")
        {
            source = Some(path.trim().to_string());
        }
        current.push_str(line);
        current.push('\n');
    }
    flush(&mut current, &mut source);

    docs
}

/// Document holds nothing but blank lines and comments
pub fn is_comment_only(doc: &str) -> bool {
    doc.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}

/// Parse an assembled manifest into resources
///
/// Comment-only and empty documents are skipped.
pub fn parse_manifest(manifest: &str, default_namespace: &str) -> Result<ResourceList> {
    let mut resources = Vec::new();

    for (source, doc) in split_documents(manifest) {
        if is_comment_only(&doc) {
            continue;
        }
        let object: JsonValue = serde_yaml::from_str(&doc).map_err(|e| KubeError::ManifestParse {
            path: source.clone().unwrap_or_else(|| "<manifest>".to_string()),
            message: e.to_string(),
        })?;
        if object.is_null() {
            continue;
        }
        resources.push(Resource::from_object(object, default_namespace, source)?);
    }

    Ok(resources)
}

/// Kinds without a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "CSIDriver",
    "VolumeSnapshotClass",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Apply order: dependencies (namespaces, CRDs, RBAC, config) before workloads
const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

fn install_rank(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(INSTALL_ORDER.len())
}

/// Stable sort into apply order
pub fn sort_for_apply(resources: &mut [Resource]) {
    resources.sort_by_key(|r| install_rank(&r.key.kind));
}

/// Stable sort into delete order (reverse of apply order)
pub fn sort_for_delete(resources: &mut [Resource]) {
    resources.sort_by_key(|r| std::cmp::Reverse(install_rank(&r.key.kind)));
}
