//! Actuator HTTP surface.
//!
//! Every long-running command serves the same router under a configurable
//! root:
//!
//! - `GET <root>/liveness` - process is up
//! - `GET <root>/readiness` - every registered [`HealthCheck`] passes
//! - `POST <root>/webhook` - Bitbucket Server push events (sync serve only)
//! - `GET <root>/audit` - audit trail window (SQLite sink only)

pub mod audit_api;
pub mod health;
pub mod webhook;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::audit::SqliteAuditSink;
use crate::lifecycle::StopSignal;

pub use health::{ClusterCheck, HealthCheck, SourceCheck, WatcherCheck};
pub use webhook::WebhookConfig;

/// Default root every actuator route is mounted under.
pub const DEFAULT_ROOT: &str = "/actuator";

/// Router builder shared by every command.
pub struct Actuator {
    root: String,
    checks: Vec<Arc<dyn HealthCheck>>,
    webhook: Option<WebhookConfig>,
    audit_log: Option<Arc<SqliteAuditSink>>,
}

impl Actuator {
    pub fn new(root: impl AsRef<str>) -> Self {
        Self {
            root: normalize_root(root.as_ref()),
            checks: Vec::new(),
            webhook: None,
            audit_log: None,
        }
    }

    /// Adds a check consulted by the readiness route.
    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Enables the webhook route.
    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Enables the audit query route.
    pub fn with_audit_log(mut self, audit_log: Arc<SqliteAuditSink>) -> Self {
        self.audit_log = Some(audit_log);
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn checks(&self) -> &[Arc<dyn HealthCheck>] {
        &self.checks
    }

    pub(crate) fn webhook(&self) -> Option<&WebhookConfig> {
        self.webhook.as_ref()
    }

    pub(crate) fn audit_log(&self) -> Option<&Arc<SqliteAuditSink>> {
        self.audit_log.as_ref()
    }

    /// Builds the axum router.
    pub fn router(self) -> Router {
        let root = self.root.clone();
        let state = Arc::new(self);

        Router::new()
            .route(&format!("{}/liveness", root), get(health::liveness))
            .route(&format!("{}/readiness", root), get(health::readiness))
            .route(&format!("{}/webhook", root), post(webhook::handle))
            .route(&format!("{}/audit", root), get(audit_api::query))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// `""`, `"/"` and `"actuator/"` become `""`, `""` and `"/actuator"`.
fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// How long in-flight requests may run once a stop is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Serves `router` on `listener` until `stop` fires, then drains for at
/// most [`SHUTDOWN_GRACE`].
pub async fn serve(listener: TcpListener, router: Router, stop: StopSignal) -> std::io::Result<()> {
    serve_with_grace(listener, router, stop, SHUTDOWN_GRACE).await
}

/// [`serve`] with an explicit drain bound. Requests still open after
/// `grace` are abandoned.
pub async fn serve_with_grace(
    listener: TcpListener,
    router: Router,
    stop: StopSignal,
    grace: Duration,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "starting actuators");
    }

    let shutdown = stop.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.stopped().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            tracing::info!("actuators stopped");
            return Ok(());
        }
        _ = stop.stopped() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            result?;
            tracing::info!("actuators stopped");
        }
        Err(_) => {
            tracing::warn!(grace = ?grace, "actuators did not drain in time, abandoning open requests");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StopHandle;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::Notify;

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root(""), "");
        assert_eq!(normalize_root("/"), "");
        assert_eq!(normalize_root("actuator/"), "/actuator");
        assert_eq!(normalize_root("/ops/actuator"), "/ops/actuator");
    }

    #[tokio::test]
    async fn test_blocked_request_does_not_hold_shutdown() {
        let entered = Arc::new(Notify::new());
        let router = Router::new().route(
            "/hang",
            get({
                let entered = Arc::clone(&entered);
                move || async move {
                    entered.notify_one();
                    std::future::pending::<&'static str>().await
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, stop) = StopHandle::new();
        let server = tokio::spawn(serve_with_grace(
            listener,
            router,
            stop,
            Duration::from_millis(100),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hang HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .expect("request never reached the handler");

        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("shutdown waited on the blocked request")
            .unwrap()
            .unwrap();
    }
}
