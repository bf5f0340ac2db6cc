//! Audit trail output
//!
//! Storage is external. The core hands snapshots to an [`AuditSink`] and never waits on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::Fill;
use crate::execution::OrderRecord;
use crate::risk::RiskBreach;

/// A snapshot worth persisting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Order { record: OrderRecord },
    Fill { order_id: String, fill: Fill },
    RiskBreach { breach: RiskBreach },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Order { .. } => "order",
            AuditEvent::Fill { .. } => "fill",
            AuditEvent::RiskBreach { .. } => "risk_breach",
        }
    }
}

/// Stored event with its capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}

/// Fire-and-forget receiver of audit events. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, event: AuditEvent) {
        debug!(kind = event.kind(), "audit event dropped");
    }
}

/// Forwards events onto an unbounded channel drained by a persistence task
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        let record = AuditRecord {
            recorded_at: Utc::now(),
            event,
        };
        if self.tx.send(record).is_err() {
            warn!("audit channel closed; event lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderSide};
    use rust_decimal_macros::dec;

    fn fill() -> Fill {
        let order = Order::market("AAPL", OrderSide::Buy, dec!(1)).unwrap();
        Fill::new(order, dec!(100), dec!(1), dec!(0.1), Utc::now(), "f-1").unwrap()
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.record(AuditEvent::Fill {
            order_id: "o-1".into(),
            fill: fill(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event.kind(), "fill");
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        sink.record(AuditEvent::Fill {
            order_id: "o-1".into(),
            fill: fill(),
        });
    }
}
