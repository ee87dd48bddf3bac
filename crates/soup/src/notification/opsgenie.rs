//! Opsgenie alert API client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{Notification, Notifier, NotifyError, Result};

/// Opsgenie rejects messages longer than this.
const MAX_MESSAGE_LEN: usize = 130;

#[derive(Debug, Serialize, PartialEq)]
struct Responder {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateAlertRequest {
    message: String,
    description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    priority: String,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    responders: Vec<Responder>,
}

impl CreateAlertRequest {
    fn from_notification(n: Notification) -> Self {
        let message = truncate_chars(&n.message, MAX_MESSAGE_LEN);
        let responders = n
            .teams
            .into_iter()
            .map(|name| Responder { name, kind: "team" })
            .collect();

        Self {
            message,
            description: n.description,
            priority: n.priority,
            tags: n.tags,
            responders,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Creates alerts through the Opsgenie REST API.
pub struct OpsgenieNotifier {
    client: reqwest::Client,
    host: String,
    api_key: SecretString,
}

impl OpsgenieNotifier {
    pub fn new(host: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn alerts_url(&self) -> String {
        format!("{}/v2/alerts", self.host)
    }
}

#[async_trait]
impl Notifier for OpsgenieNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let request = CreateAlertRequest::from_notification(notification);

        let response = self
            .client
            .post(self.alerts_url())
            .header(
                "Authorization",
                format!("GenieKey {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(message = %request.message, "sent opsgenie notification");
        Ok(())
    }
}
