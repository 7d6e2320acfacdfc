//! Integration tests for CLI commands
//!
//! Only commands that work without a cluster are exercised here.

use std::process::{Command, Output};
use tempfile::TempDir;

fn keel(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keel"))
        .args(args)
        .env_remove("KEEL_NAMESPACE")
        .env_remove("KEEL_DRIVER")
        .env_remove("KEEL_DATA_DIR")
        .env_remove("KEEL_CONFIG")
        .output()
        .expect("Failed to execute keel")
}

/// Run against an empty file store in a fresh directory
fn keel_with_store(store: &TempDir, args: &[&str]) -> Output {
    let dir = store.path().to_str().unwrap();
    let mut full = vec!["--driver", "file", "--data-dir", dir];
    full.extend_from_slice(args);
    keel(&full)
}

fn fixture(name: &str) -> String {
    format!("{}/../../fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

mod template_command {
    use super::*;

    #[test]
    fn test_renders_manifest_hooks_and_notes() {
        let output = keel(&["template", "demo", &fixture("hello")]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let out = stdout(&output);
        assert!(out.contains("# Source: hello/templates/configmap.yaml"));
        assert!(out.contains("name: demo-config"));
        assert!(out.contains("namespace: default"));
        assert!(out.contains("greeting: hello"));
        assert!(out.contains("# Source: hello/templates/smoke-test.yaml"));
        assert!(out.contains("demo says hello."));
    }

    #[test]
    fn test_set_and_namespace_flags() {
        let output = keel(&[
            "template",
            "demo",
            &fixture("hello"),
            "--set",
            "greeting=hi",
            "-n",
            "apps",
        ]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let out = stdout(&output);
        assert!(out.contains("greeting: hi"));
        assert!(out.contains("namespace: apps"));
    }

    #[test]
    fn test_show_only_and_no_hooks() {
        let output = keel(&[
            "template",
            "demo",
            &fixture("hello"),
            "--show-only",
            "configmap",
            "--no-hooks",
        ]);
        assert!(output.status.success());

        let out = stdout(&output);
        assert!(out.contains("demo-config"));
        assert!(!out.contains("demo-smoke"));
        assert!(!out.contains("NOTES:"));
    }

    #[test]
    fn test_missing_chart_exit_code() {
        let output = keel(&["template", "demo", &fixture("does-not-exist")]);
        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_chart_without_metadata_exit_code() {
        let output = keel(&["template", "demo", &fixture("broken")]);
        assert_eq!(output.status.code(), Some(4));
        assert!(stderr(&output).contains("Chart.yaml"));
    }

    #[test]
    fn test_malformed_set_exit_code() {
        let output = keel(&["template", "demo", &fixture("hello"), "--set", "novalue"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("key=value"));
    }
}

mod store_commands {
    use super::*;

    #[test]
    fn test_list_empty_store() {
        let store = TempDir::new().unwrap();
        let output = keel_with_store(&store, &["list"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("No releases found in namespace default"));
    }

    #[test]
    fn test_list_all_namespaces_json() {
        let store = TempDir::new().unwrap();
        let output = keel_with_store(&store, &["list", "-A", "-o", "json"]);
        assert!(output.status.success());

        let json: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("Output should be valid JSON");
        assert_eq!(json, serde_json::json!([]));
    }

    #[test]
    fn test_list_rejects_unknown_status() {
        let store = TempDir::new().unwrap();
        let output = keel_with_store(&store, &["list", "--status", "sleeping"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_list_rejects_bad_filter() {
        let store = TempDir::new().unwrap();
        let output = keel_with_store(&store, &["list", "--filter", "("]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_missing_release_exit_codes() {
        let store = TempDir::new().unwrap();
        for command in ["history", "status", "recover"] {
            let output = keel_with_store(&store, &[command, "ghost"]);
            assert_eq!(output.status.code(), Some(6), "{} should report not found", command);
            assert!(stderr(&output).contains("ghost"));
        }
    }
}

mod configuration {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_namespace_from_config_file() {
        let store = TempDir::new().unwrap();
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "namespace: team-a").unwrap();

        let output = keel_with_store(
            &store,
            &["--config", config.path().to_str().unwrap(), "list"],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("namespace team-a"));
    }

    #[test]
    fn test_invalid_config_file() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "storage:\n  compression: brotli").unwrap();

        let output = keel(&["--config", config.path().to_str().unwrap(), "list"]);
        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let output = keel(&["--config", "/definitely/not/here.yaml", "list"]);
        assert_eq!(output.status.code(), Some(64));
    }
}
