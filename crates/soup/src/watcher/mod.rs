//! Cluster drift watcher.
//!
//! One observer per effective (scope, resource kind) pair, grouped per
//! scope. Cluster-scoped kinds and the `all` namespace each collapse to a
//! single cluster-wide observer per kind.
//! Kinds are validated against discovery before any observer is built;
//! after [`DriftWatcher::start`] synchronization and event delivery happen
//! in the background until the stop signal fires.

pub mod diff;
pub mod handler;
pub mod kind;
pub mod observer;

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::discovery::Scope;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::lifecycle::StopSignal;

pub use handler::{DiffHandler, ResourceEventHandler, WatchHandler};
pub use kind::ResourceKind;
pub use observer::{ObservedChange, ObserverCache};

use observer::{Observer, ObserverGroup};

/// Namespace value meaning every namespace.
pub const ALL_NAMESPACES: &str = "all";

/// Errors raised while setting up the watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid resource kind '{0}', expected version/resource or group/version/resource")]
    InvalidKind(String),

    #[error("Resource kind '{0}' is not served by the cluster")]
    UnknownKind(String),

    #[error("Resource kind '{0}' does not support watch")]
    NotWatchable(String),

    #[error("Discovery failed for '{kind}': {source}")]
    Discovery {
        kind: String,
        #[source]
        source: kube::Error,
    },

    #[error("Invalid watch mode '{0}', expected watch or diff")]
    InvalidMode(String),

    #[error("Nothing to watch: {0}")]
    EmptySpec(&'static str),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// What to observe. Immutable once the watcher is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec {
    pub resource_kinds: Vec<ResourceKind>,
    pub namespaces: BTreeSet<String>,
}

impl WatchSpec {
    pub fn new(
        resource_kinds: impl IntoIterator<Item = ResourceKind>,
        namespaces: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            resource_kinds: resource_kinds.into_iter().collect(),
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }
}

/// Which audit events the watcher raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Every add, update and delete.
    #[default]
    Watch,
    /// Only updates that changed the object, as a diff.
    Diff,
}

impl FromStr for WatchMode {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watch" => Ok(WatchMode::Watch),
            "diff" => Ok(WatchMode::Diff),
            _ => Err(WatchError::InvalidMode(s.to_string())),
        }
    }
}

/// Where one observer lists and watches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum WatchScope {
    All,
    Namespace(String),
}

impl WatchScope {
    pub fn label(&self) -> &str {
        match self {
            WatchScope::All => ALL_NAMESPACES,
            WatchScope::Namespace(ns) => ns,
        }
    }
}

/// Effective observers grouped by scope, each (scope, kind) pair once.
pub(crate) fn observer_targets(
    kinds: &[(ResourceKind, Scope)],
    namespaces: &BTreeSet<String>,
) -> BTreeMap<WatchScope, BTreeSet<ResourceKind>> {
    let every_namespace = namespaces.contains(ALL_NAMESPACES);
    let mut targets: BTreeMap<WatchScope, BTreeSet<ResourceKind>> = BTreeMap::new();

    for (kind, scope) in kinds {
        if every_namespace || *scope == Scope::Cluster {
            targets.entry(WatchScope::All).or_default().insert(kind.clone());
            continue;
        }
        for namespace in namespaces {
            targets
                .entry(WatchScope::Namespace(namespace.clone()))
                .or_default()
                .insert(kind.clone());
        }
    }
    targets
}

/// Shareable view of every observer's sync flag.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    flags: Arc<Vec<Arc<AtomicBool>>>,
}

impl SyncState {
    /// True only when every observer completed its first listing.
    pub fn has_synced(&self) -> bool {
        self.flags.iter().all(|f| f.load(Ordering::Acquire))
    }
}

/// Watches a set of kinds across a set of namespaces.
pub struct DriftWatcher {
    groups: Vec<ObserverGroup>,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
    audit: Arc<dyn AuditSink>,
    resync: Option<Duration>,
    sync_state: SyncState,
    tasks: Vec<JoinHandle<()>>,
}

impl DriftWatcher {
    /// Validates every kind and builds one observer per effective
    /// (scope, kind) pair.
    pub async fn new(
        client: Client,
        spec: WatchSpec,
        resync: Option<Duration>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        if spec.resource_kinds.is_empty() {
            return Err(WatchError::EmptySpec("no resource kinds"));
        }
        if spec.namespaces.is_empty() {
            return Err(WatchError::EmptySpec("no namespaces"));
        }

        let mut resolved = BTreeMap::new();
        for kind in &spec.resource_kinds {
            if resolved.contains_key(kind) {
                continue;
            }
            let (resource, capabilities) = kind.resolve(&client).await?;
            resolved.insert(kind.clone(), (resource, capabilities));
        }

        let scoped: Vec<(ResourceKind, Scope)> = resolved
            .iter()
            .map(|(kind, (_, capabilities))| (kind.clone(), capabilities.scope.clone()))
            .collect();

        let mut groups = Vec::new();
        let mut flags = Vec::new();
        for (scope, kinds) in observer_targets(&scoped, &spec.namespaces) {
            let mut group = ObserverGroup {
                namespace: scope.label().to_string(),
                observers: Vec::new(),
                streams: Vec::new(),
            };

            for kind in kinds {
                let Some((resource, _)) = resolved.get(&kind) else { continue };
                let api: Api<DynamicObject> = match &scope {
                    WatchScope::All => Api::all_with(client.clone(), resource),
                    WatchScope::Namespace(ns) => Api::namespaced_with(client.clone(), ns, resource),
                };

                let synced = Arc::new(AtomicBool::new(false));
                flags.push(Arc::clone(&synced));
                group.observers.push(Observer {
                    label: format!("{} {}", scope.label(), kind),
                    cache: ObserverCache::new(),
                    synced,
                });
                group.streams.push(
                    watcher(api, watcher::Config::default())
                        .default_backoff()
                        .boxed(),
                );
            }

            groups.push(group);
        }

        tracing::info!(
            kinds = spec.resource_kinds.len(),
            namespaces = spec.namespaces.len(),
            observers = flags.len(),
            "drift watcher built"
        );

        Ok(Self {
            groups,
            handlers: Vec::new(),
            audit,
            resync,
            sync_state: SyncState {
                flags: Arc::new(flags),
            },
            tasks: Vec::new(),
        })
    }

    /// Attaches the handler for `mode` to every observer.
    pub fn add_event_handler(&mut self, mode: WatchMode) {
        let handler: Arc<dyn ResourceEventHandler> = match mode {
            WatchMode::Watch => Arc::new(WatchHandler::new(Arc::clone(&self.audit))),
            WatchMode::Diff => Arc::new(DiffHandler::new(Arc::clone(&self.audit))),
        };
        self.add_handler(handler);
    }

    /// Attaches a custom handler to every observer.
    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn has_synced(&self) -> bool {
        self.sync_state.has_synced()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state.clone()
    }

    /// Starts every observer group and returns immediately.
    pub fn start(&mut self, stop: StopSignal) {
        if self.groups.is_empty() {
            tracing::warn!("drift watcher already started");
            return;
        }

        let handlers = Arc::new(self.handlers.clone());
        for group in self.groups.drain(..) {
            self.tasks.push(tokio::spawn(group.run(
                Arc::clone(&handlers),
                self.resync,
                stop.clone(),
            )));
        }
    }

    /// Waits for every started group to finish.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "observer group task failed");
            }
        }
    }
}
