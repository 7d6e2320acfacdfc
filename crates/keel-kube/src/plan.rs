//! Resource planning: what an operation creates, updates and deletes
//!
//! The planner only classifies. Whether `deleted` entries are actually
//! removed from the cluster is decided by the caller.

use similar::TextDiff;
use std::collections::BTreeMap;

use crate::annotations::keel;
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::resources::{Resource, ResourceKey, read_annotations};

/// A resource present in both baseline and target
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub resource: Resource,
    /// Unified diff of baseline vs target; `None` when identical
    pub diff: Option<String>,
}

/// Classification of target resources against a baseline
#[derive(Debug, Clone, Default)]
pub struct ResourcePlan {
    /// In target, absent from baseline
    pub created: Vec<Resource>,
    /// In both
    pub updated: Vec<ResourceUpdate>,
    /// In baseline, absent from target
    pub deleted: Vec<Resource>,
}

impl ResourcePlan {
    /// Diff target against baseline by `(groupVersion, kind, namespace, name)`
    ///
    /// Output keeps the target's order for `created`/`updated` and the
    /// baseline's order for `deleted`.
    pub fn compute(baseline: &[Resource], target: &[Resource]) -> Self {
        let before: BTreeMap<&ResourceKey, &Resource> =
            baseline.iter().map(|r| (&r.key, r)).collect();
        let after: BTreeMap<&ResourceKey, &Resource> =
            target.iter().map(|r| (&r.key, r)).collect();

        let mut plan = ResourcePlan::default();

        for resource in target {
            match before.get(&resource.key) {
                None => plan.created.push(resource.clone()),
                Some(old) => {
                    let diff = (old.object != resource.object)
                        .then(|| unified_diff(&resource.key, &old.to_yaml(), &resource.to_yaml()));
                    plan.updated.push(ResourceUpdate {
                        resource: resource.clone(),
                        diff,
                    });
                }
            }
        }

        plan.deleted = baseline
            .iter()
            .filter(|r| !after.contains_key(&r.key))
            .cloned()
            .collect();

        plan
    }

    /// Updated entries whose content did not change
    pub fn unchanged(&self) -> usize {
        self.updated.iter().filter(|u| u.diff.is_none()).count()
    }

    /// Updated entries with actual changes
    pub fn changed(&self) -> impl Iterator<Item = &ResourceUpdate> {
        self.updated.iter().filter(|u| u.diff.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.unchanged() == self.updated.len()
    }

    /// Every target resource, created first then updated
    pub fn target_resources(&self) -> Vec<Resource> {
        self.created
            .iter()
            .cloned()
            .chain(self.updated.iter().map(|u| u.resource.clone()))
            .collect()
    }

    /// Deletions, minus anything protected by `resource-policy: keep`
    pub fn prunable(&self) -> Vec<Resource> {
        self.deleted
            .iter()
            .filter(|r| !r.has_keep_policy())
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update ({} unchanged), {} to delete",
            self.created.len(),
            self.updated.len() - self.unchanged(),
            self.unchanged(),
            self.deleted.len()
        )
    }
}

fn unified_diff(key: &ResourceKey, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", key), &format!("b/{}", key))
        .to_string()
}

/// Stamp release ownership annotations on each resource
pub fn stamp_ownership(resources: &mut [Resource], release: &str, namespace: &str) {
    for resource in resources {
        resource.set_annotation(keel::RELEASE_NAME, release);
        resource.set_annotation(keel::RELEASE_NAMESPACE, namespace);
    }
}

/// Whether a live object carries this release's ownership annotations
pub fn is_owned_by(live: &serde_json::Value, release: &str, namespace: &str) -> bool {
    let annotations = read_annotations(live);
    annotations.get(keel::RELEASE_NAME).map(String::as_str) == Some(release)
        && annotations.get(keel::RELEASE_NAMESPACE).map(String::as_str) == Some(namespace)
}

/// Fail if a resource about to be created already exists under another owner
pub async fn check_ownership<K: KubeClient + ?Sized>(
    client: &K,
    created: &[Resource],
    release: &str,
    namespace: &str,
) -> Result<()> {
    for resource in created {
        if let Some(live) = client.get(&resource.key).await?
            && !is_owned_by(&live, release, namespace)
        {
            return Err(KubeError::ExistingResourceConflict {
                resource: resource.key.to_string(),
                release: release.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKubeClient;
    use crate::resources::parse_manifest;

    fn cm(name: &str, data: &str) -> String {
        format!(
            "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\ndata:\n  v: \"{}\"\n",
            name, data
        )
    }

    #[test]
    fn test_plan_classification() {
        let baseline = parse_manifest(&[cm("keep", "1"), cm("change", "1"), cm("gone", "1")].concat(), "ns").unwrap();
        let target = parse_manifest(&[cm("keep", "1"), cm("change", "2"), cm("new", "1")].concat(), "ns").unwrap();

        let plan = ResourcePlan::compute(&baseline, &target);

        assert_eq!(plan.created.len(), 1);
        assert_eq!(plan.created[0].key.name, "new");
        assert_eq!(plan.updated.len(), 2);
        assert_eq!(plan.unchanged(), 1);
        assert_eq!(plan.deleted.len(), 1);
        assert_eq!(plan.deleted[0].key.name, "gone");

        let changed: Vec<_> = plan.changed().collect();
        let diff = changed[0].diff.as_deref().unwrap();
        assert!(diff.contains("-  v: '1'") || diff.contains("-  v: \"1\""));
        assert_eq!(plan.summary(), "1 to create, 1 to update (1 unchanged), 1 to delete");
    }

    #[test]
    fn test_namespace_is_part_of_identity() {
        let baseline = parse_manifest(&cm("a", "1"), "one").unwrap();
        let target = parse_manifest(&cm("a", "1"), "two").unwrap();

        let plan = ResourcePlan::compute(&baseline, &target);
        assert_eq!(plan.created.len(), 1);
        assert_eq!(plan.deleted.len(), 1);
    }

    #[test]
    fn test_prunable_honours_keep() {
        let kept = "---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n  annotations:\n    helm.sh/resource-policy: keep\n";
        let baseline = parse_manifest(&[kept.to_string(), cm("x", "1")].concat(), "ns").unwrap();

        let plan = ResourcePlan::compute(&baseline, &[]);
        assert_eq!(plan.deleted.len(), 2);
        let prunable: Vec<_> = plan.prunable().into_iter().map(|r| r.key.name).collect();
        assert_eq!(prunable, vec!["x"]);
    }

    #[tokio::test]
    async fn test_ownership_conflict() {
        let client = MockKubeClient::new();
        let mut foreign = parse_manifest(&cm("taken", "1"), "ns").unwrap();
        stamp_ownership(&mut foreign, "other", "ns");
        client.seed(foreign);

        let mut ours = parse_manifest(&cm("mine", "1"), "ns").unwrap();
        stamp_ownership(&mut ours, "web", "ns");
        client.seed(ours);

        let wanted = parse_manifest(&[cm("taken", "1"), cm("mine", "1"), cm("free", "1")].concat(), "ns").unwrap();

        let err = check_ownership(&client, &wanted, "web", "ns").await.unwrap_err();
        assert!(matches!(err, KubeError::ExistingResourceConflict { ref resource, .. } if resource == "ConfigMap/ns/taken"));

        check_ownership(&client, &wanted[1..], "web", "ns").await.unwrap();
    }
}
