//! Execution gateway interface
//!
//! Broker connectivity is external; the lifecycle handler only needs `submit` and a stream
//! of fill/error reports keyed by order id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Order, OrderSide, OrderType};
use crate::error::GatewayError;

/// What the gateway is asked to place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Lifecycle order id, echoed back on fill/error reports
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

impl GatewayRequest {
    pub fn for_order(client_order_id: impl Into<String>, order: &Order, quantity: Decimal) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol: order.symbol().to_string(),
            side: order.side(),
            quantity,
            order_type: order.order_type(),
            limit_price: order.limit_price(),
        }
    }
}

/// Acknowledgement of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub broker_order_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Asynchronous report from the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Fill {
        order_id: String,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
    },
    Error {
        order_id: String,
        code: String,
        message: String,
    },
}

impl GatewayEvent {
    pub fn order_id(&self) -> &str {
        match self {
            GatewayEvent::Fill { order_id, .. } | GatewayEvent::Error { order_id, .. } => order_id,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(&self, request: GatewayRequest) -> Result<OrderHandle, GatewayError>;
}

/// Accepts everything and remembers what it was sent. Used for dry runs and the CLI.
#[derive(Debug, Default)]
pub struct PaperGateway {
    seq: AtomicU64,
    submitted: Mutex<Vec<GatewayRequest>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submitted(&self) -> Vec<GatewayRequest> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit(&self, request: GatewayRequest) -> Result<OrderHandle, GatewayError> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            client_order_id = %request.client_order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            "paper order accepted"
        );
        self.submitted.lock().await.push(request);
        Ok(OrderHandle {
            broker_order_id: format!("paper-{}", n),
            accepted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_gateway_accepts_and_records() {
        let gw = PaperGateway::new();
        let order = Order::limit("AAPL", OrderSide::Buy, dec!(5), dec!(190)).unwrap();
        let handle = gw
            .submit(GatewayRequest::for_order("o-1", &order, dec!(5)))
            .await
            .unwrap();
        assert_eq!(handle.broker_order_id, "paper-1");

        let sent = gw.submitted().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].limit_price, Some(dec!(190)));
    }

    #[test]
    fn test_gateway_event_order_id() {
        let e = GatewayEvent::Error {
            order_id: "o-7".into(),
            code: "REJECTED".into(),
            message: "halted".into(),
        };
        assert_eq!(e.order_id(), "o-7");
    }
}
