//! Keel Kube - release orchestration against a Kubernetes cluster
//!
//! - **Coordinator**: install, upgrade, rollback and uninstall end to end
//! - **Hooks**: classification of rendered output and ordered execution
//! - **Planning**: create/update/delete sets between two manifests
//! - **Storage**: versioned release records (memory, local files, Secrets)
//! - **Cluster access**: the [`KubeClient`] boundary, with a server-side
//!   apply implementation and an in-memory one for tests

pub mod actions;
pub mod annotations;
pub mod client;
pub mod cluster;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod mock;
pub mod plan;
pub mod readiness;
pub mod release;
pub mod resources;
pub mod storage;

pub use actions::{
    InstallOptions, NameGenerator, RandomNameGenerator, RollbackOptions, UninstallOptions,
    UpgradeOptions, ValueReusePolicy,
};
pub use client::{ApplyReport, KubeClient};
pub use cluster::ClusterClient;
pub use coordinator::{Coordinator, Rendered, render_chart};
pub use error::{KubeError, Result};
pub use hooks::{Hook, HookEvent, HookExecutor, HookPhase};
pub use mock::MockKubeClient;
pub use plan::{ResourcePlan, ResourceUpdate};
pub use release::{Release, ReleaseInfo, ReleaseStatus};
pub use resources::{Resource, ResourceKey, ResourceList};
pub use storage::{
    CompressionMethod, FileDriver, ListRequest, ListResponse, MemoryDriver, SecretsDriver, SortBy,
    SortOrder, Storage, StorageConfig, StorageDriver,
};
