//! Shared helpers for CLI commands

use keel_core::{Values, parse_set_values};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CliError, Result};

/// User config from `-f` files then `--set` pairs, later layers winning
///
/// Chart defaults are not included; the coordinator coalesces them.
pub fn load_values(files: &[PathBuf], set: &[String]) -> Result<Values> {
    let mut values = Values::new();
    for file in files {
        values.merge(&Values::from_file(file)?);
        tracing::debug!(file = %file.display(), "merged values file");
    }
    if !set.is_empty() {
        values.merge(&parse_set_values(set)?);
    }
    Ok(values)
}

/// `key=value` pairs into a map
pub fn parse_labels(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(CliError::validation(format!(
                "invalid label '{}', expected key=value",
                pair
            ))),
        })
        .collect()
}

/// clap value parser for `30s`, `5m`, `1h30m`
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Token cancelled on Ctrl-C
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_values_layers() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "image:\n  tag: v1\n  repo: nginx\nreplicas: 1").unwrap();

        let values = load_values(
            &[file.path().to_path_buf()],
            &["image.tag=v2".to_string()],
        )
        .unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("image.repo").unwrap(), "nginx");
        assert_eq!(values.get("replicas").unwrap(), 1);
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(&["team=web".into(), "tier=".into()]).unwrap();
        assert_eq!(labels["team"], "web");
        assert_eq!(labels["tier"], "");

        assert!(parse_labels(&["novalue".into()]).is_err());
        assert!(parse_labels(&["=x".into()]).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("soon").is_err());
    }
}
