use thiserror::Error;

use crate::audit::AuditError;
use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::gitops::{ReconcileError, RenderError, SourceError};
use crate::lifecycle::LifecycleError;
use crate::notification::NotifyError;
use crate::secrets::SecretError;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum SoupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, SoupError>;
