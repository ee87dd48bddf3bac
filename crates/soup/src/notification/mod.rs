//! Outbound alerts raised when a reconciliation fails.

pub mod opsgenie;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use opsgenie::OpsgenieNotifier;

/// Errors raised while delivering a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result type for notification delivery.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// An alert to deliver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Alert text.
    pub message: String,
    /// Alert text in long form.
    pub description: String,
    /// Labels attached to the alert.
    pub tags: Vec<String>,
    /// Alert priority, e.g. `P3`.
    pub priority: String,
    /// Teams set as responders.
    pub teams: Vec<String>,
}

/// Priority, tags and responders stamped on every alert a command raises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub priority: String,
    pub tags: Vec<String>,
    pub teams: Vec<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            priority: "P3".to_string(),
            tags: Vec::new(),
            teams: Vec::new(),
        }
    }
}

impl AlertSettings {
    pub fn notification(
        &self,
        message: impl Into<String>,
        description: impl Into<String>,
    ) -> Notification {
        Notification {
            message: message.into(),
            description: description.into(),
            tags: self.tags.clone(),
            priority: self.priority.clone(),
            teams: self.teams.clone(),
        }
    }
}

/// Sends notifications somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Prints notifications to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if notification.description.is_empty() {
            println!("{}", notification.message);
        } else {
            println!("{}: {}", notification.message, notification.description);
        }
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: Notification) -> Result<()> {
        Ok(())
    }
}
