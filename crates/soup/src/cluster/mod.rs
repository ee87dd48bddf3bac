//! Cluster access: target resolution and the declarative applier.

pub mod applier;
pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use applier::KubeApplier;
pub use client::build_client;

/// Errors raised while talking to the cluster.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Invalid cluster target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Failed to infer cluster configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Cluster unhealthy: {0}")]
    Unhealthy(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Which cluster to talk to. Configured once at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTarget {
    /// Kubeconfig path or API server URL. Empty means in-cluster or the
    /// default kubeconfig.
    pub path: String,
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
}

/// Idempotent declarative apply plus a reachability check.
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Applies one single-document manifest into `namespace`.
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
