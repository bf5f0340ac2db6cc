//! Notification fan-out
//!
//! Concrete channels (chat, email, webhooks) live outside the core and plug in through
//! [`Notifier`]. One failing channel never blocks the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Notification severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A delivery channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the tracing log at a level matching their severity
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.severity {
            Severity::Info => info!(title = %n.title, metadata = %n.metadata, "{}", n.message),
            Severity::Warning => warn!(title = %n.title, metadata = %n.metadata, "{}", n.message),
            Severity::Error | Severity::Critical => {
                error!(severity = %n.severity, title = %n.title, metadata = %n.metadata, "{}", n.message)
            }
        }
        Ok(())
    }
}

/// Per-notifier result of a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub notifier: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Fans a notification out to every registered notifier concurrently
pub struct NotificationHub {
    notifiers: Vec<Arc<dyn Notifier>>,
    event_tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            notifiers: Vec::new(),
            event_tx,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Subscribe to every broadcast notification
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.event_tx.subscribe()
    }

    pub async fn broadcast(&self, notification: Notification) -> Vec<DeliveryReport> {
        // No receivers is fine
        let _ = self.event_tx.send(notification.clone());

        let deliveries = self.notifiers.iter().map(|notifier| {
            let n = &notification;
            async move {
                match notifier.notify(n).await {
                    Ok(()) => DeliveryReport {
                        notifier: notifier.name().to_string(),
                        delivered: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!(notifier = notifier.name(), "notification delivery failed: {}", e);
                        DeliveryReport {
                            notifier: notifier.name().to_string(),
                            delivered: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });

        let reports = join_all(deliveries).await;
        debug!(
            title = %notification.title,
            delivered = reports.iter().filter(|r| r.delivered).count(),
            total = reports.len(),
            "notification broadcast"
        );
        reports
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
