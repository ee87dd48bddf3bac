//! Bitbucket Server webhook.
//!
//! `repo:refs_changed` triggers a single-branch reconciliation per changed
//! ref; `diagnostics:ping` is acknowledged. Any other event key is refused.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{error_response, Actuator};
use crate::gitops::{failure_notification, Reconciler};
use crate::notification::{AlertSettings, Notifier};

pub const EVENT_KEY_HEADER: &str = "X-Event-Key";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

pub const REFS_CHANGED_EVENT: &str = "repo:refs_changed";
pub const PING_EVENT: &str = "diagnostics:ping";

/// Everything the webhook route needs to reconcile and alert.
pub struct WebhookConfig {
    pub reconciler: Arc<Reconciler>,
    /// Shared secret for `X-Hub-Signature`; unsigned requests are accepted
    /// when unset.
    pub secret: Option<SecretString>,
    pub notifier: Arc<dyn Notifier>,
    /// Repository URL quoted in alerts.
    pub repo_url: String,
    pub alert: AlertSettings,
}

/// `repo:refs_changed` body, reduced to what is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefsChangedPayload {
    #[serde(default)]
    pub changes: Vec<RefChange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefChange {
    pub ref_id: String,
    #[serde(rename = "type", default)]
    pub change_type: String,
}

impl RefChange {
    pub fn is_delete(&self) -> bool {
        self.change_type.eq_ignore_ascii_case("DELETE")
    }
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    event: String,
    reconciled: Vec<String>,
}

/// Checks a `sha256=<hex>` signature of `body` against `secret`.
pub fn verify_signature(secret: &SecretString, body: &[u8], header: Option<&str>) -> bool {
    let Some(expected) = header
        .and_then(|h| h.trim().strip_prefix("sha256="))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature header value for `body`, as a Bitbucket server would send it.
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) async fn handle(
    State(actuator): State<Arc<Actuator>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(config) = actuator.webhook() else {
        return error_response(StatusCode::NOT_FOUND, "webhook not enabled");
    };

    if let Some(secret) = &config.secret {
        if !verify_signature(secret, &body, header(&headers, SIGNATURE_HEADER)) {
            tracing::warn!("webhook signature mismatch");
            return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let event = header(&headers, EVENT_KEY_HEADER).unwrap_or_default();
    match event {
        PING_EVENT => {
            tracing::info!("bitbucket diagnostics ping");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    event: event.to_string(),
                    reconciled: Vec::new(),
                }),
            )
                .into_response()
        }
        REFS_CHANGED_EVENT => refs_changed(config, &body).await,
        other => {
            tracing::warn!(event = other, "bitbucket event not handled");
            error_response(StatusCode::FORBIDDEN, format!("event '{}' not handled", other))
        }
    }
}

async fn refs_changed(config: &WebhookConfig, body: &[u8]) -> Response {
    let payload: RefsChangedPayload = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid payload: {}", e))
        }
    };

    let mut reconciled = Vec::new();
    for change in &payload.changes {
        if change.is_delete() {
            tracing::debug!(reference = %change.ref_id, "skipping deleted ref");
            continue;
        }

        tracing::info!(reference = %change.ref_id, "modified branch");
        if let Err(e) = config.reconciler.reconcile_one_branch(&change.ref_id).await {
            tracing::error!(reference = %change.ref_id, error = %e, "webhook reconciliation failed");
            let notification = failure_notification(&config.repo_url, &e, &config.alert);
            if let Err(notify_err) = config.notifier.notify(notification).await {
                tracing::warn!(error = %notify_err, "failed to send notification");
            }
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        reconciled.push(change.ref_id.clone());
    }

    (
        StatusCode::OK,
        Json(WebhookResponse {
            event: REFS_CHANGED_EVENT.to_string(),
            reconciled,
        }),
    )
        .into_response()
}
