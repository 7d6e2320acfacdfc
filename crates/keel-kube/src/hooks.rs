//! Lifecycle hooks: classification of rendered output and sequential execution
//!
//! A rendered document becomes a hook when its `hook` annotation names at
//! least one recognized event. Everything else stays a plain manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::annotations::{self, helm, keel};
use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::resources::{self, Resource};

/// Lifecycle event a hook can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreDelete,
    PostDelete,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
}

impl HookEvent {
    pub const ALL: [HookEvent; 8] = [
        HookEvent::PreInstall,
        HookEvent::PostInstall,
        HookEvent::PreDelete,
        HookEvent::PostDelete,
        HookEvent::PreUpgrade,
        HookEvent::PostUpgrade,
        HookEvent::PreRollback,
        HookEvent::PostRollback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreInstall => "pre-install",
            HookEvent::PostInstall => "post-install",
            HookEvent::PreDelete => "pre-delete",
            HookEvent::PostDelete => "post-delete",
            HookEvent::PreUpgrade => "pre-upgrade",
            HookEvent::PostUpgrade => "post-upgrade",
            HookEvent::PreRollback => "pre-rollback",
            HookEvent::PostRollback => "post-rollback",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or(())
    }
}

/// When a hook resource gets deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookDeletePolicy {
    /// Delete a previous instance before creating the hook
    BeforeHookCreation,
    HookSucceeded,
    HookFailed,
}

impl HookDeletePolicy {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "before-hook-creation" => Some(Self::BeforeHookCreation),
            "hook-succeeded" => Some(Self::HookSucceeded),
            "hook-failed" => Some(Self::HookFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    Unknown,
    Running,
    Succeeded,
    Failed,
}

/// Record of the last execution of a hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRun {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub phase: HookPhase,
}

/// A hook manifest belonging to one release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// `metadata.name` of the hook resource
    pub name: String,
    pub kind: String,
    /// Source path of the template that produced it
    pub path: String,
    pub manifest: String,
    /// Recognized events, in annotation order
    pub events: Vec<HookEvent>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub delete_policies: Vec<HookDeletePolicy>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub last_run: Option<HookRun>,
}

impl Hook {
    pub fn runs_on(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn has_delete_policy(&self, policy: HookDeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }
}

/// Split rendered output into hooks and plain manifests
///
/// Paths are visited in order. Blank documents are dropped. A document that
/// does not parse fails the whole classification. Several plain documents
/// from one path are re-joined under that path.
pub fn classify(manifests: &BTreeMap<String, String>) -> Result<(Vec<Hook>, BTreeMap<String, String>)> {
    let mut hooks = Vec::new();
    let mut plain: BTreeMap<String, String> = BTreeMap::new();

    for (path, text) in manifests {
        if text.trim().is_empty() {
            continue;
        }

        let mut plain_docs = Vec::new();
        for (_, doc) in resources::split_documents(text) {
            if resources::is_comment_only(&doc) {
                plain_docs.push(doc);
                continue;
            }

            let object: JsonValue = serde_yaml::from_str(&doc).map_err(|e| KubeError::ManifestParse {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if !object.is_object() {
                return Err(KubeError::ManifestParse {
                    path: path.clone(),
                    message: "document is not a mapping".to_string(),
                });
            }

            match hook_from_document(path, &doc, &object)? {
                Some(hook) => hooks.push(hook),
                None => plain_docs.push(doc),
            }
        }

        if !plain_docs.is_empty() {
            let joined = plain_docs
                .iter()
                .map(|d| d.trim_end())
                .collect::<Vec<_>>()
                .join("\n---\n");
            plain.insert(path.clone(), format!("{}\n", joined));
        }
    }

    Ok((hooks, plain))
}

fn hook_from_document(path: &str, doc: &str, object: &JsonValue) -> Result<Option<Hook>> {
    let annotations = resources::read_annotations(object);
    let Some(value) = annotations::get_annotation(&annotations, keel::HOOK, helm::HOOK) else {
        return Ok(None);
    };

    let events: Vec<HookEvent> = annotations::split_list(value)
        .into_iter()
        .filter_map(|token| token.parse().ok())
        .collect();
    if events.is_empty() {
        return Ok(None);
    }

    let name = object
        .pointer("/metadata/name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| KubeError::ManifestParse {
            path: path.to_string(),
            message: "hook is missing metadata.name".to_string(),
        })?
        .to_string();
    let kind = object
        .get("kind")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let delete_policies = annotations::get_annotation(
        &annotations,
        keel::HOOK_DELETE_POLICY,
        helm::HOOK_DELETE_POLICY,
    )
    .map(|v| {
        annotations::split_list(v)
            .into_iter()
            .filter_map(HookDeletePolicy::parse)
            .collect()
    })
    .unwrap_or_default();

    Ok(Some(Hook {
        name,
        kind,
        path: path.to_string(),
        manifest: doc.to_string(),
        events,
        weight: annotations::parse_hook_weight(&annotations),
        delete_policies,
        timeout: annotations::parse_hook_timeout(&annotations),
        last_run: None,
    }))
}

/// Runs the hooks of one event against a cluster
pub struct HookExecutor<'a, K: KubeClient + ?Sized> {
    client: &'a K,
    namespace: &'a str,
    default_timeout: Duration,
}

impl<'a, K: KubeClient + ?Sized> HookExecutor<'a, K> {
    pub fn new(client: &'a K, namespace: &'a str) -> Self {
        Self {
            client,
            namespace,
            default_timeout: annotations::DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Timeout for hooks without their own `hook-timeout`
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute every hook attached to `event`
    ///
    /// Hooks run one at a time in ascending weight, ties in declaration
    /// order. The first failure stops the event. `last_run` is updated on
    /// each executed hook, including the failed one.
    pub async fn execute(&self, hooks: &mut [Hook], event: HookEvent) -> Result<()> {
        let mut selected: Vec<usize> = (0..hooks.len()).filter(|&i| hooks[i].runs_on(event)).collect();
        selected.sort_by_key(|&i| hooks[i].weight);

        if selected.is_empty() {
            return Ok(());
        }
        tracing::info!(event = %event, count = selected.len(), "running hooks");

        for index in selected {
            let hook = &mut hooks[index];
            let started_at = Utc::now();
            hook.last_run = Some(HookRun {
                started_at,
                completed_at: None,
                phase: HookPhase::Running,
            });

            let outcome = self.run_one(hook).await;
            let phase = if outcome.is_ok() {
                HookPhase::Succeeded
            } else {
                HookPhase::Failed
            };
            hook.last_run = Some(HookRun {
                started_at,
                completed_at: Some(Utc::now()),
                phase,
            });

            if let Err(err) = outcome {
                tracing::warn!(hook = %hook.name, event = %event, error = %err, "hook failed");
                return Err(match err {
                    hook_err @ KubeError::HookFailed { .. } => hook_err,
                    other => KubeError::HookFailed {
                        hook: hook.name.clone(),
                        event: event.to_string(),
                        message: other.to_string(),
                    },
                });
            }
            tracing::debug!(hook = %hook.name, event = %event, "hook succeeded");
        }

        Ok(())
    }

    async fn run_one(&self, hook: &Hook) -> Result<()> {
        let resources = self.client.build(&hook.manifest, self.namespace)?;
        let resource = resources.into_iter().next().ok_or_else(|| KubeError::ManifestParse {
            path: hook.path.clone(),
            message: "hook manifest is empty".to_string(),
        })?;

        if hook.has_delete_policy(HookDeletePolicy::BeforeHookCreation) {
            self.client.delete(std::slice::from_ref(&resource)).await?;
        }

        self.client.create(std::slice::from_ref(&resource)).await?;

        let timeout = hook.timeout.unwrap_or(self.default_timeout);
        let result = self.client.watch_until_ready(&resource, timeout).await;

        let cleanup = match &result {
            Ok(()) => hook.has_delete_policy(HookDeletePolicy::HookSucceeded),
            Err(_) => hook.has_delete_policy(HookDeletePolicy::HookFailed),
        };
        if cleanup {
            self.cleanup(&resource).await;
        }

        result
    }

    async fn cleanup(&self, resource: &Resource) {
        if let Err(err) = self.client.delete(std::slice::from_ref(resource)).await {
            tracing::warn!(resource = %resource.key, error = %err, "failed to delete hook resource");
        }
    }
}
