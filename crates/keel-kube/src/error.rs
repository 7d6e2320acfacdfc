//! Error types for keel-kube

use thiserror::Error;

/// Result type for keel-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors surfaced by release operations, storage and cluster access
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Rejected input (chart, name, options)
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("release name '{name}' is already in use\nHint: pick another name or pass --replace for a deleted/failed release")]
    NameConflict { name: String },

    #[error("could not generate a free release name after {attempts} attempts")]
    NameGenerationExhausted { attempts: usize },

    #[error("release '{name}' has no deployed releases")]
    NoDeployedReleases { name: String },

    /// The latest version of the release holds the pending lock
    #[error("another operation is in progress for release '{name}': {status}\nHint: Run `keel recover {name}` if the operation is stuck")]
    OperationInProgress { name: String, status: String },

    #[error("render failed: {0}")]
    Render(#[from] keel_engine::EngineError),

    #[error("failed to parse manifest {path}: {message}")]
    ManifestParse { path: String, message: String },

    #[error("{resource} already exists and is not owned by release '{release}'\nHint: pass --take-ownership to adopt it")]
    ExistingResourceConflict { resource: String, release: String },

    #[error("apply failed: {0}")]
    Apply(String),

    #[error("timed out after {timeout} waiting for {what}")]
    WaitTimeout { what: String, timeout: String },

    #[error("hook '{hook}' failed during {event}: {message}")]
    HookFailed {
        hook: String,
        event: String,
        message: String,
    },

    #[error("release '{name}'{} not found", .version.map(|v| format!(" version {v}")).unwrap_or_default())]
    ReleaseNotFound { name: String, version: Option<u32> },

    #[error("release '{name}' version {version} already exists")]
    ReleaseAlreadyExists { name: String, version: u32 },

    #[error("release '{name}' is already deleted")]
    AlreadyDeleted { name: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// Atomic mode: the failure was undone by a rollback
    #[error("{cause}\nThe release was rolled back: {outcome}")]
    RolledBack {
        cause: Box<KubeError>,
        outcome: String,
    },

    /// Atomic mode: the failure and the rollback both failed
    #[error("{cause}\nRollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<KubeError>,
        rollback: Box<KubeError>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<keel_core::CoreError> for KubeError {
    fn from(e: keel_core::CoreError) -> Self {
        KubeError::Validation(e.to_string())
    }
}

impl KubeError {
    /// Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Kubernetes 409
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Errors raised before anything touched the cluster
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            KubeError::Validation(_)
                | KubeError::NameConflict { .. }
                | KubeError::NameGenerationExhausted { .. }
                | KubeError::NoDeployedReleases { .. }
                | KubeError::OperationInProgress { .. }
                | KubeError::Render(_)
                | KubeError::ManifestParse { .. }
                | KubeError::ExistingResourceConflict { .. }
        )
    }
}
