//! Audit trail for consequential operations.
//!
//! Every component that clones, fetches, checks out, applies, detects drift
//! or starts/stops a supervised task hands an [`AuditEvent`] to an
//! [`AuditSink`]. Recording is best-effort: callers log a failed record and
//! carry on.

pub mod sqlite;

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::{default_audit_path, AuditPage, ReadLogOption, SqliteAuditSink};

/// Actor recorded for events raised by the process itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Action names written to [`AuditEvent::action`].
pub mod action {
    pub const PLAIN_CLONE: &str = "PlainClone";
    pub const GET_BRANCH_NAMES: &str = "GetBranchNames";
    pub const FETCH: &str = "Fetch";
    pub const CHECKOUT: &str = "Checkout";
    pub const LS_REMOTE: &str = "LsRemote";
    pub const APPLY: &str = "Apply";
    pub const EVENT_ADD: &str = "EventAdd";
    pub const EVENT_UPDATE: &str = "EventUpdate";
    pub const EVENT_DELETE: &str = "EventDelete";
    pub const EVENT_DIFF: &str = "EventDiff";
}

/// Errors raised by audit sinks.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to prepare audit log directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit database lock poisoned")]
    LockPoisoned,

    #[error("Audit task failed: {0}")]
    Task(String),

    #[error("Invalid audit query: {0}")]
    InvalidQuery(String),
}

/// Result type for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub actor: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event stamped with the current UTC time.
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    /// Creates an event attributed to the process itself.
    pub fn system(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(action, SYSTEM_ACTOR, message)
    }
}

/// Destination for audit events. Must tolerate concurrent writers.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists one event.
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Records an event and logs instead of failing.
    async fn record_or_log(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.record(event).await {
            tracing::warn!(action = %action, error = %e, "check audit subsystem");
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Writes events to the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "soup::audit",
            action = %event.action,
            actor = %event.actor,
            created_at = %event.created_at.to_rfc3339(),
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Keeps events in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events with the given action.
    pub fn with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuditEvent) -> Result<()> {
            Err(AuditError::InvalidQuery("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::system("First", "one")).await.unwrap();
        sink.record(AuditEvent::new("Second", "alice", "two")).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "First");
        assert_eq!(events[0].actor, SYSTEM_ACTOR);
        assert_eq!(events[1].actor, "alice");
        assert_eq!(sink.with_action("Second").len(), 1);
    }

    #[tokio::test]
    async fn test_record_or_log_swallows_errors() {
        FailingSink
            .record_or_log(AuditEvent::system("Anything", "ignored"))
            .await;
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new("Checkout", "bot", "checkout develop");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"action\":\"Checkout\""));
        assert!(json.contains("\"created_at\""));
    }
}
