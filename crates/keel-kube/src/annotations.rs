//! Annotation keys, with Helm compatibility
//!
//! Both `keel.sh/*` and `helm.sh/*` are recognized so existing charts keep
//! working. When both are present the `keel.sh` key wins.

use std::collections::BTreeMap;
use std::time::Duration;

/// Keel-native annotations
pub mod keel {
    pub const HOOK: &str = "keel.sh/hook";
    pub const HOOK_WEIGHT: &str = "keel.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "keel.sh/hook-delete-policy";
    /// Upper bound for one hook's create-and-wait (`30s`, `5m`)
    pub const HOOK_TIMEOUT: &str = "keel.sh/hook-timeout";
    pub const RESOURCE_POLICY: &str = "keel.sh/resource-policy";
    /// Ownership stamp: release name
    pub const RELEASE_NAME: &str = "keel.sh/release-name";
    /// Ownership stamp: release namespace
    pub const RELEASE_NAMESPACE: &str = "keel.sh/release-namespace";
}

/// Helm-compatible annotations
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Value of `resource-policy` that protects a resource from deletion
pub const KEEP_POLICY: &str = "keep";

/// Default hook timeout
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(300);

/// Get annotation value, preferring keel over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    keel_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(keel_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Split a comma-separated annotation value, dropping blanks
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Hook weight (default: 0, unparseable also 0)
pub fn parse_hook_weight(annotations: &BTreeMap<String, String>) -> i32 {
    get_annotation(annotations, keel::HOOK_WEIGHT, helm::HOOK_WEIGHT)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Hook timeout from `keel.sh/hook-timeout`
pub fn parse_hook_timeout(annotations: &BTreeMap<String, String>) -> Option<Duration> {
    annotations
        .get(keel::HOOK_TIMEOUT)
        .and_then(|s| parse_duration(s))
}

/// `resource-policy: keep`
pub fn has_keep_policy(annotations: &BTreeMap<String, String>) -> bool {
    get_annotation(annotations, keel::RESOURCE_POLICY, helm::RESOURCE_POLICY)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(KEEP_POLICY))
}

/// Parse `100ms`, `30s`, `5m`, `1h`; a bare number is seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (digits, unit_secs, millis) = if let Some(n) = value.strip_suffix("ms") {
        (n, 0, true)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1, false)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60, false)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3600, false)
    } else {
        (value, 1, false)
    };

    let num: u64 = digits.trim().parse().ok()?;
    if millis {
        Some(Duration::from_millis(num))
    } else {
        num.checked_mul(unit_secs).map(Duration::from_secs)
    }
}
