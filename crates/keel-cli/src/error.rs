//! CLI error types with exit code handling
//!
//! Every library error is funneled into [`CliError`], which knows its exit
//! code and carries a hint where one helps.

use keel_core::CoreError;
use keel_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Validation failed: {message}")]
    #[diagnostic(code(keel::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Rendering failed; the engine diagnostic keeps its source snippet
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] keel_engine::EngineError),

    #[error("Manifest error: {message}")]
    #[diagnostic(code(keel::cli::manifest))]
    Manifest { message: String },

    #[error("Chart error: {message}")]
    #[diagnostic(code(keel::cli::chart))]
    Chart {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(keel::cli::config))]
    Config { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(keel::cli::io))]
    Io { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::not_found))]
    NotFound { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::conflict))]
    Conflict {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Operation cancelled")]
    #[diagnostic(code(keel::cli::cancelled))]
    Cancelled,

    #[error("{message}")]
    #[diagnostic(code(keel::cli::error))]
    Other { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Template(_) | CliError::Manifest { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Chart { .. } => exit_codes::CHART_ERROR,
            CliError::Config { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Conflict { .. } => exit_codes::CONFLICT,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Cancelled => exit_codes::CANCELLED,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    fn conflict(message: String, help: &str) -> Self {
        Self::Conflict {
            message,
            help: Some(help.to_string()),
        }
    }

    fn cluster(message: String, help: Option<&str>) -> Self {
        Self::Cluster {
            message,
            help: help.map(str::to_string),
        }
    }
}

/// Keep only the first line of a library message; later lines are hints
fn headline(err: &KubeError) -> String {
    err.to_string().lines().next().unwrap_or_default().to_string()
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Validation(message) => CliError::validation(message),
            KubeError::Render(engine) => CliError::Template(engine),
            KubeError::ManifestParse { .. } => CliError::Manifest {
                message: err.to_string(),
            },
            KubeError::ReleaseNotFound { .. } | KubeError::NoDeployedReleases { .. } => {
                CliError::NotFound {
                    message: err.to_string(),
                }
            }
            KubeError::NameConflict { .. } => CliError::conflict(
                headline(&err),
                "pick another name, or pass --replace to reuse the name of a deleted or failed release",
            ),
            KubeError::OperationInProgress { ref name, .. } => {
                let help = format!("run `keel recover {}` if the operation is stuck", name);
                CliError::conflict(headline(&err), &help)
            }
            KubeError::ExistingResourceConflict { .. } => CliError::conflict(
                headline(&err),
                "pass --take-ownership to adopt the existing resource",
            ),
            KubeError::ReleaseAlreadyExists { .. }
            | KubeError::AlreadyDeleted { .. }
            | KubeError::NameGenerationExhausted { .. } => CliError::Conflict {
                message: err.to_string(),
                help: None,
            },
            KubeError::ClusterUnreachable(_) => CliError::cluster(
                err.to_string(),
                Some("check your kubeconfig, or use --driver file for offline commands"),
            ),
            KubeError::WaitTimeout { .. } => {
                CliError::cluster(err.to_string(), Some("raise --timeout or inspect the workloads"))
            }
            KubeError::Api(_)
            | KubeError::Apply(_)
            | KubeError::HookFailed { .. }
            | KubeError::RolledBack { .. }
            | KubeError::RollbackFailed { .. } => CliError::cluster(err.to_string(), None),
            KubeError::Cancelled => CliError::Cancelled,
            KubeError::Io(io) => CliError::Io {
                message: io.to_string(),
            },
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ChartNotFound { .. } => CliError::Chart {
                message: err.to_string(),
                help: Some("pass the path of a directory containing Chart.yaml".to_string()),
            },
            CoreError::Io(io) => CliError::Io {
                message: io.to_string(),
            },
            CoreError::ValuesMerge { message } => CliError::validation(message),
            other => CliError::Chart {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: format!("serialization failed: {}", err),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::Other {
            message: format!("serialization failed: {}", err),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err: CliError = KubeError::ReleaseNotFound {
            name: "web".into(),
            version: None,
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);

        let err: CliError = KubeError::OperationInProgress {
            name: "web".into(),
            status: "pending-upgrade".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::CONFLICT);
        assert!(!err.to_string().contains("Hint"));

        let err: CliError = KubeError::Cancelled.into();
        assert_eq!(err.exit_code(), exit_codes::CANCELLED);

        let err: CliError = CoreError::ChartNotFound { path: "x".into() }.into();
        assert_eq!(err.exit_code(), exit_codes::CHART_ERROR);
    }
}
