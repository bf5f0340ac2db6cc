use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use super::lifecycle::{OrderRecord, OrderStatus};
use crate::domain::Fill;
use crate::error::Result;

/// Receives order lifecycle events. Called after the handler has committed its state.
pub trait OrderObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_fill(&self, _record: &OrderRecord, _fill: &Fill) -> Result<()> {
        Ok(())
    }

    fn on_status_change(&self, _record: &OrderRecord, _previous: OrderStatus) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverEventKind {
    Fill,
    StatusChange,
}

/// What happened when one observer was handed one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverDelivery {
    pub observer: String,
    pub event: ObserverEventKind,
    pub error: Option<String>,
}

impl ObserverDelivery {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Registered observers. Publishing visits every observer regardless of earlier failures.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn OrderObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, observer: Arc<dyn OrderObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn len(&self) -> usize {
        self.observers.read().await.len()
    }

    pub async fn publish_fill(&self, record: &OrderRecord, fill: &Fill) -> Vec<ObserverDelivery> {
        self.publish(ObserverEventKind::Fill, |o| o.on_fill(record, fill))
            .await
    }

    pub async fn publish_status_change(
        &self,
        record: &OrderRecord,
        previous: OrderStatus,
    ) -> Vec<ObserverDelivery> {
        self.publish(ObserverEventKind::StatusChange, |o| {
            o.on_status_change(record, previous)
        })
        .await
    }

    async fn publish<F>(&self, event: ObserverEventKind, deliver: F) -> Vec<ObserverDelivery>
    where
        F: Fn(&dyn OrderObserver) -> Result<()>,
    {
        let observers = self.observers.read().await.clone();
        observers
            .iter()
            .map(|observer| {
                let error = match deliver(observer.as_ref()) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(observer = observer.name(), event = ?event, "observer failed: {}", e);
                        Some(e.to_string())
                    }
                };
                ObserverDelivery {
                    observer: observer.name().to_string(),
                    event,
                    error,
                }
            })
            .collect()
    }
}
