pub mod actuator;
pub mod audit;
pub mod cluster;
pub mod config;
pub mod error;
pub mod gitops;
pub mod lifecycle;
pub mod notification;
pub mod secrets;
pub mod version;
pub mod watcher;

pub use actuator::Actuator;
pub use audit::{AuditEvent, AuditSink};
pub use cluster::{ClusterApplier, ClusterTarget, KubeApplier};
pub use config::{AuditTarget, ConfigError, InformerTarget, NotifierTarget};
pub use error::{Result, SoupError};
pub use gitops::{Reconciler, SourceRepository, SyncScheduler};
pub use lifecycle::{LifecycleController, LifecycleError, StopSignal, TerminationSignal};
pub use notification::{AlertSettings, Notification, Notifier};
pub use secrets::{SecretError, SecretSource};
pub use version::VersionInfo;
pub use watcher::{DriftWatcher, WatchMode, WatchSpec};
