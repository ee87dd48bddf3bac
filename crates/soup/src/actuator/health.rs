//! Liveness and readiness routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::Actuator;
use crate::cluster::ClusterApplier;
use crate::gitops::SourceRepository;
use crate::watcher::SyncState;

/// One dependency the readiness route consults.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> Result<(), String>;
}

/// Source repository reachable without cloning.
pub struct SourceCheck {
    source: Arc<dyn SourceRepository>,
}

impl SourceCheck {
    pub fn new(source: Arc<dyn SourceRepository>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl HealthCheck for SourceCheck {
    fn name(&self) -> &str {
        "source"
    }

    async fn check(&self) -> Result<(), String> {
        self.source.reachable().await.map_err(|e| e.to_string())
    }
}

/// Cluster API server answers its health endpoint.
pub struct ClusterCheck {
    applier: Arc<dyn ClusterApplier>,
}

impl ClusterCheck {
    pub fn new(applier: Arc<dyn ClusterApplier>) -> Self {
        Self { applier }
    }
}

#[async_trait]
impl HealthCheck for ClusterCheck {
    fn name(&self) -> &str {
        "cluster"
    }

    async fn check(&self) -> Result<(), String> {
        self.applier.ping().await.map_err(|e| e.to_string())
    }
}

/// Every watcher observer finished its first listing.
pub struct WatcherCheck {
    state: SyncState,
}

impl WatcherCheck {
    pub fn new(state: SyncState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl HealthCheck for WatcherCheck {
    fn name(&self) -> &str {
        "watcher"
    }

    async fn check(&self) -> Result<(), String> {
        if self.state.has_synced() {
            Ok(())
        } else {
            Err("informers not synced".to_string())
        }
    }
}

/// Health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of both health routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckResult>,
}

pub(crate) async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Up,
        message: "System Alive".to_string(),
        checks: BTreeMap::new(),
    })
}

pub(crate) async fn readiness(State(actuator): State<Arc<Actuator>>) -> Response {
    let mut checks = BTreeMap::new();
    let mut ready = true;

    for check in actuator.checks() {
        let result = match check.check().await {
            Ok(()) => CheckResult {
                status: HealthStatus::Up,
                error: None,
            },
            Err(e) => {
                tracing::warn!(check = check.name(), error = %e, "readiness check failed");
                ready = false;
                CheckResult {
                    status: HealthStatus::Down,
                    error: Some(e),
                }
            }
        };
        checks.insert(check.name().to_string(), result);
    }

    let (code, status, message) = if ready {
        (StatusCode::OK, HealthStatus::Up, "System Ready")
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthStatus::Down,
            "System Not Ready",
        )
    };

    (
        code,
        Json(HealthResponse {
            status,
            message: message.to_string(),
            checks,
        }),
    )
        .into_response()
}
