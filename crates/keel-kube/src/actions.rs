//! Options for install, upgrade, rollback and uninstall

use keel_core::Values;
use rand::seq::IndexedRandom;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};

/// Default bound for waits and hooks
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Attempts at finding a free generated name
pub const NAME_GENERATION_ATTEMPTS: usize = 5;

/// Release names end up in label values and object names
pub const MAX_RELEASE_NAME_LEN: usize = 53;

const RELEASE_NAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

/// Reject names that are not lowercase DNS-1123 subdomains of at most 53 characters
pub fn validate_release_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KubeError::Validation("release name is required".to_string()));
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(KubeError::Validation(format!(
            "release name '{}' exceeds {} characters",
            name, MAX_RELEASE_NAME_LEN
        )));
    }
    let pattern = Regex::new(RELEASE_NAME_PATTERN).map_err(|e| KubeError::Validation(e.to_string()))?;
    if !pattern.is_match(name) {
        return Err(KubeError::Validation(format!(
            "release name '{}' must consist of lowercase alphanumerics, '-' or '.'",
            name
        )));
    }
    Ok(())
}

/// Source of release names when the caller does not supply one
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `<adjective>-<noun>`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNameGenerator;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "eager", "fancy", "gentle", "happy", "jolly", "kind", "lively", "mellow",
    "nimble", "proud", "quiet", "rapid", "silent", "steady", "sunny", "tidy", "vivid", "witty",
];

const NOUNS: &[&str] = &[
    "anchor", "beacon", "breeze", "canyon", "comet", "delta", "ember", "falcon", "harbor", "island",
    "lagoon", "meadow", "otter", "pebble", "quarry", "reef", "spruce", "summit", "tide", "willow",
];

impl NameGenerator for RandomNameGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("keel");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("release");
        format!("{}-{}", adjective, noun)
    }
}

/// How stored values combine with the values passed to an upgrade
///
/// When several flags would apply, the first variant listed here wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueReusePolicy {
    /// Only the new values
    ResetValues,
    /// Previous computed values, with the new values layered on top
    ReuseValues,
    /// New chart defaults, previous config, then new values
    ResetThenReuseValues,
    /// Carry the previous config forward only when no new values are given
    #[default]
    Default,
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// `None` asks for a generated name
    pub name: Option<String>,
    pub namespace: String,
    pub values: Values,
    /// Reuse the name of a deleted or failed release
    pub replace: bool,
    /// Adopt existing resources not owned by any release
    pub take_ownership: bool,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    /// On failure, uninstall what was created
    pub atomic: bool,
    pub disable_hooks: bool,
    pub dry_run: bool,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub cancel: CancellationToken,
}

impl InstallOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::generated(namespace)
        }
    }

    /// Options for an install with a generated release name
    pub fn generated(namespace: impl Into<String>) -> Self {
        Self {
            name: None,
            namespace: namespace.into(),
            values: Values::new(),
            replace: false,
            take_ownership: false,
            wait: false,
            wait_for_jobs: false,
            timeout: DEFAULT_TIMEOUT,
            atomic: false,
            disable_hooks: false,
            dry_run: false,
            description: None,
            labels: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn with_wait_for_jobs(mut self) -> Self {
        self.wait = true;
        self.wait_for_jobs = true;
        self
    }

    /// Atomic implies waiting
    pub fn with_atomic(mut self) -> Self {
        self.atomic = true;
        self.wait = true;
        self
    }

    pub fn with_replace(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn with_take_ownership(mut self) -> Self {
        self.take_ownership = true;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub name: String,
    pub namespace: String,
    pub values: Values,
    pub value_reuse: ValueReusePolicy,
    pub take_ownership: bool,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    /// On failure, roll back to the last successful version
    pub atomic: bool,
    pub disable_hooks: bool,
    pub dry_run: bool,
    /// Take over conflicting fields; replace objects with immutable changes
    pub force: bool,
    /// Delete resources that vanished from the manifest
    pub prune: bool,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub cancel: CancellationToken,
}

impl UpgradeOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            values: Values::new(),
            value_reuse: ValueReusePolicy::Default,
            take_ownership: false,
            wait: false,
            wait_for_jobs: false,
            timeout: DEFAULT_TIMEOUT,
            atomic: false,
            disable_hooks: false,
            dry_run: false,
            force: false,
            prune: true,
            description: None,
            labels: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_value_reuse(mut self, policy: ValueReusePolicy) -> Self {
        self.value_reuse = policy;
        self
    }

    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn with_wait_for_jobs(mut self) -> Self {
        self.wait = true;
        self.wait_for_jobs = true;
        self
    }

    pub fn with_atomic(mut self) -> Self {
        self.atomic = true;
        self.wait = true;
        self
    }

    pub fn with_take_ownership(mut self) -> Self {
        self.take_ownership = true;
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn without_prune(mut self) -> Self {
        self.prune = false;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub name: String,
    pub namespace: String,
    /// Target version; 0 means the one before the latest
    pub version: u32,
    /// Restart pods of workload resources after applying
    pub recreate: bool,
    /// Adopt live resources the restored version creates but another owner holds
    pub take_ownership: bool,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    pub force: bool,
    pub disable_hooks: bool,
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

impl RollbackOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: 0,
            recreate: false,
            take_ownership: false,
            wait: false,
            wait_for_jobs: false,
            timeout: DEFAULT_TIMEOUT,
            force: false,
            disable_hooks: false,
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn to_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_recreate(mut self) -> Self {
        self.recreate = true;
        self
    }

    pub fn with_take_ownership(mut self) -> Self {
        self.take_ownership = true;
        self
    }

    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UninstallOptions {
    pub name: String,
    pub namespace: String,
    /// Remove every stored version once resources are gone
    pub purge: bool,
    pub disable_hooks: bool,
    pub dry_run: bool,
    pub timeout: Duration,
    pub description: Option<String>,
}

impl UninstallOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            purge: false,
            disable_hooks: false,
            dry_run: false,
            timeout: DEFAULT_TIMEOUT,
            description: None,
        }
    }

    pub fn with_purge(mut self) -> Self {
        self.purge = true;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.disable_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_name_validation() {
        assert!(validate_release_name("web").is_ok());
        assert!(validate_release_name("my-app.v2").is_ok());
        assert!(validate_release_name("").is_err());
        assert!(validate_release_name("Web").is_err());
        assert!(validate_release_name("-web").is_err());
        assert!(validate_release_name("web_1").is_err());
        assert!(validate_release_name(&"a".repeat(54)).is_err());
        assert!(validate_release_name(&"a".repeat(53)).is_ok());
    }

    #[test]
    fn test_generated_names_are_valid() {
        for _ in 0..20 {
            let name = RandomNameGenerator.generate();
            validate_release_name(&name).unwrap();
            assert_eq!(name.split('-').count(), 2);
        }
    }

    #[test]
    fn test_atomic_implies_wait() {
        let options = InstallOptions::new("web", "default").with_atomic();
        assert!(options.wait);

        let options = UpgradeOptions::new("web", "default").with_atomic();
        assert!(options.wait);
        assert!(options.prune);
    }
}
