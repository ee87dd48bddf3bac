//! Event handlers that turn observed changes into audit events.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;

use super::diff;
use crate::audit::{action, AuditEvent, AuditSink};

/// Actor recorded on watcher events. The watch stream does not say who
/// made a change.
pub const WATCHER_ACTOR: &str = "unknown";

/// Callbacks invoked for every change an observer sees.
#[async_trait]
pub trait ResourceEventHandler: Send + Sync {
    async fn on_add(&self, obj: &DynamicObject);
    async fn on_update(&self, old: &DynamicObject, new: &DynamicObject);
    async fn on_delete(&self, obj: &DynamicObject);
}

fn describe(obj: &DynamicObject) -> String {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or("object");
    match obj.namespace() {
        Some(ns) => format!("{} {}/{}", kind, ns, obj.name_any()),
        None => format!("{} {}", kind, obj.name_any()),
    }
}

fn to_value(obj: &DynamicObject) -> serde_json::Value {
    serde_json::to_value(obj).unwrap_or(serde_json::Value::Null)
}

/// Records every add, update and delete with the full object.
pub struct WatchHandler {
    audit: Arc<dyn AuditSink>,
}

impl WatchHandler {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    async fn record(&self, action: &str, obj: &DynamicObject) {
        let rendered = diff::normalize(to_value(obj));
        self.audit
            .record_or_log(AuditEvent::new(
                action,
                WATCHER_ACTOR,
                format!("{}: {}", describe(obj), rendered),
            ))
            .await;
    }
}

#[async_trait]
impl ResourceEventHandler for WatchHandler {
    async fn on_add(&self, obj: &DynamicObject) {
        self.record(action::EVENT_ADD, obj).await;
    }

    async fn on_update(&self, _old: &DynamicObject, new: &DynamicObject) {
        self.record(action::EVENT_UPDATE, new).await;
    }

    async fn on_delete(&self, obj: &DynamicObject) {
        self.record(action::EVENT_DELETE, obj).await;
    }
}

/// Records only updates that changed the object, carrying the diff.
pub struct DiffHandler {
    audit: Arc<dyn AuditSink>,
}

impl DiffHandler {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl ResourceEventHandler for DiffHandler {
    async fn on_add(&self, _obj: &DynamicObject) {}

    async fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        let changes = diff::diff(&to_value(old), &to_value(new));
        if changes.is_empty() {
            return;
        }

        tracing::debug!(object = %describe(new), changes = changes.len(), "drift detected");
        self.audit
            .record_or_log(AuditEvent::new(
                action::EVENT_DIFF,
                WATCHER_ACTOR,
                format!("{}:\n{}", describe(new), diff::render(&changes)),
            ))
            .await;
    }

    async fn on_delete(&self, _obj: &DynamicObject) {}
}
