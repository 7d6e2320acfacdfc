//! Configuration values: merging, dotted-path access and sub-chart scoping

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Key under which values are shared with every sub-chart
pub const GLOBAL_KEY: &str = "global";

/// A tree of configuration values
///
/// The root is always expected to be a mapping; a `null` root behaves as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML; an empty document yields empty values
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let blank = yaml.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l.starts_with('#')
        });
        if blank {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::normalized(value))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self::normalized(value))
    }

    fn normalized(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        }
    }

    /// Overlay `other` onto these values
    ///
    /// Mappings merge recursively; scalars and sequences from `other` replace.
    pub fn merge(&mut self, other: &Values) {
        deep_merge(&mut self.0, &other.0);
    }

    /// Merge several layers in order, later layers winning
    pub fn merge_all<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Values>,
    {
        layers.into_iter().fold(Values::new(), |mut acc, layer| {
            acc.merge(&layer);
            acc
        })
    }

    /// Combine user-supplied values with chart defaults
    ///
    /// User values take precedence. A `null` user value deletes the key
    /// from the defaults instead of storing `null`.
    pub fn coalesce(defaults: &Values, user: &Values) -> Values {
        let mut result = defaults.0.clone();
        coalesce_into(&mut result, &user.0);
        Self::normalized(result)
    }

    /// Set a value by dotted path (`image.tag`), creating parents as needed
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(CoreError::ValuesMerge {
                message: format!("invalid value path '{}'", path),
            });
        }
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
        Ok(())
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |current, key| current.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Values visible to a sub-chart: its own section plus `global`
    pub fn scope_for_subchart(&self, subchart: &str) -> Values {
        let mut scoped = Map::new();

        if let JsonValue::Object(parent) = &self.0 {
            if let Some(global) = parent.get(GLOBAL_KEY) {
                scoped.insert(GLOBAL_KEY.to_string(), global.clone());
            }
            if let Some(JsonValue::Object(section)) = parent.get(subchart) {
                for (k, v) in section {
                    scoped.insert(k.clone(), v.clone());
                }
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Resolve the final values of a sub-chart
    ///
    /// The sub-chart's own defaults are coalesced with the parent's scoped section.
    pub fn for_subchart(defaults: &Values, parent: &Values, subchart: &str) -> Values {
        Values::coalesce(defaults, &parent.scope_for_subchart(subchart))
    }
}

fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn coalesce_into(base: &mut JsonValue, user: &JsonValue) {
    match (base, user) {
        (JsonValue::Object(base_map), JsonValue::Object(user_map)) => {
            for (key, value) in user_map {
                if value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => coalesce_into(existing, value),
                    None => {
                        base_map.insert(key.clone(), strip_nulls(value));
                    }
                }
            }
        }
        (base, user) => *base = strip_nulls(user),
    }
}

fn strip_nulls(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, rest)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(Map::new());
    }

    if let JsonValue::Object(map) = value {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        set_nested(entry, rest, new_value);
    }
}

/// Parse `--set key=value` arguments into a values tree
///
/// Values are typed: booleans, `null`, integers, floats and inline JSON
/// are recognized; everything else is a string.
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, raw) = arg.split_once('=').ok_or_else(|| CoreError::ValuesMerge {
            message: format!("invalid --set format: '{}', expected key=value", arg),
        })?;
        values.set(key, parse_scalar(raw))?;
    }

    Ok(values)
}

fn parse_scalar(raw: &str) -> JsonValue {
    match raw {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        "null" => return JsonValue::Null,
        _ => {}
    }

    if let Ok(n) = raw.parse::<i64>() {
        return JsonValue::Number(n.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return JsonValue::Number(n);
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str(raw) {
            return parsed;
        }
    }
    JsonValue::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_replaces_scalars_and_sequences() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
ports: [80, 443]
"#,
        )
        .unwrap();
        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
ports: [8080]
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("ports").unwrap(), &json!([8080]));
    }

    #[test]
    fn test_coalesce_null_deletes_default() {
        let defaults = Values(json!({"a": 1, "b": {"c": 2, "d": 3}}));
        let user = Values(json!({"a": null, "b": {"d": null, "e": 5}}));

        let result = Values::coalesce(&defaults, &user);

        assert_eq!(result.0, json!({"b": {"c": 2, "e": 5}}));
    }

    #[test]
    fn test_empty_yaml_is_empty_values() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
        assert!(values.0.is_object());
    }

    #[test]
    fn test_set_and_get() {
        let mut values = Values::new();
        values.set("image.tag", json!("v1")).unwrap();
        values.set("replicas", json!(3)).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v1");
        assert_eq!(values.get("replicas").unwrap(), 3);
        assert!(values.get("image.missing").is_none());
        assert!(values.set("a..b", json!(1)).is_err());
    }

    #[test]
    fn test_parse_set_values() {
        let args = vec![
            "image.tag=v2".to_string(),
            "replicas=5".to_string(),
            "debug=true".to_string(),
            "ratio=0.5".to_string(),
            "list=[1,2]".to_string(),
        ];
        let values = parse_set_values(&args).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);
        assert_eq!(values.get("ratio").unwrap(), 0.5);
        assert_eq!(values.get("list").unwrap(), &json!([1, 2]));

        assert!(parse_set_values(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_subchart_scoping() {
        let parent = Values::from_yaml(
            r#"
global:
  registry: docker.io
redis:
  replicas: 3
postgresql:
  enabled: false
"#,
        )
        .unwrap();
        let defaults = Values::from_yaml("replicas: 1\nimage: redis\n").unwrap();

        let resolved = Values::for_subchart(&defaults, &parent, "redis");

        assert_eq!(resolved.get("global.registry").unwrap(), "docker.io");
        assert_eq!(resolved.get("replicas").unwrap(), 3);
        assert_eq!(resolved.get("image").unwrap(), "redis");
        assert!(resolved.get("postgresql").is_none());
    }
}
