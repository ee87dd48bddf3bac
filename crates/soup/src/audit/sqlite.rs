//! SQLite-backed audit log.
//!
//! Events live in a single `audit_events` table indexed on `created_at`
//! (microseconds since the epoch). Every access goes through one
//! `Mutex<Connection>`; blocking work runs on the tokio blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{AuditError, AuditEvent, AuditSink, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_created_at ON audit_events (created_at);
";

/// Time window and paging for audit queries.
#[derive(Debug, Clone)]
pub struct ReadLogOption {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ReadLogOption {
    pub fn between(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            limit: None,
            offset: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.start_time > self.end_time {
            return Err(AuditError::InvalidQuery(
                "end time can't be before start time".to_string(),
            ));
        }
        Ok(())
    }
}

/// One page of a window query plus the size of the whole window.
#[derive(Debug, Clone, Default)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: u64,
}

/// Audit sink persisting to SQLite.
#[derive(Clone)]
pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditSink {
    /// Opens (or creates) the log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        log::info!("Audit log opened at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// In-memory log, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Events inside the option's window, oldest first, with the window's
    /// total. Both come from the same locked read.
    pub async fn query(&self, option: &ReadLogOption) -> Result<AuditPage> {
        option.validate()?;

        let start = option.start_time.timestamp_micros();
        let end = option.end_time.timestamp_micros();
        let limit = option.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = option.offset as i64;

        self.with_conn(move |conn| {
            let total: u64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_events WHERE created_at >= ?1 AND created_at <= ?2",
                params![start, end],
                |r| r.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT action, actor, message, created_at FROM audit_events
                 WHERE created_at >= ?1 AND created_at <= ?2
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let events = stmt
                .query_map(params![start, end, limit, offset], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(AuditPage { events, total })
        })
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| AuditError::LockPoisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| AuditError::Task(e.to_string()))?
    }
}

fn event_from_row(row: &Row<'_>) -> std::result::Result<AuditEvent, rusqlite::Error> {
    let micros: i64 = row.get("created_at")?;
    Ok(AuditEvent {
        action: row.get("action")?,
        actor: row.get("actor")?,
        message: row.get("message")?,
        created_at: DateTime::from_timestamp_micros(micros).unwrap_or_default(),
    })
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit_events (action, actor, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.action,
                    event.actor,
                    event.message,
                    event.created_at.timestamp_micros()
                ],
            )?;
            Ok(())
        })
        .await
    }
}

/// Default location of the audit database: `~/.soup/audit.db`.
pub fn default_audit_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".soup").join("audit.db"))
}
