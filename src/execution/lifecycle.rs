//! Order lifecycle handler
//!
//! Tracks each order from submission through fills, cancellation or error:
//!
//! PENDING -> SUBMITTED -> PARTIALLY_FILLED* -> FILLED
//!                    \-> CANCELLED | ERROR (-> SUBMITTED on resubmit)
//!
//! Fill-driven status is a pure function of filled vs total quantity. CANCELLED and ERROR
//! are asserted from outside.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::gateway::{ExecutionGateway, GatewayEvent, GatewayRequest, OrderHandle};
use super::idempotency::dedup_key;
use super::observer::{ObserverDelivery, ObserverRegistry, OrderObserver};
use super::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Fill, Order, OrderSide, OrderType};
use crate::error::{GatewayError, OrderError, Result};
use crate::persistence::{AuditEvent, AuditSink, NullAuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Error,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Error => "ERROR",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Live at the venue or about to be
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }

    fn accepts_fills(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One order's lifecycle state.
///
/// `filled_quantity + remaining_quantity == order.quantity()` at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub order: Order,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Quantity-weighted across fills
    pub avg_fill_price: Decimal,
    pub fills: Vec<Fill>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub broker_order_id: Option<String>,
    pub dedup_key: String,
    pub submission_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    /// Earliest time the caller should resubmit; `None` once retries are exhausted
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    fn new(order_id: String, order: Order, dedup_key: String, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            remaining_quantity: order.quantity(),
            order,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fills: Vec::new(),
            retry_count: 0,
            error_message: None,
            broker_order_id: None,
            dedup_key,
            submission_time: at,
            last_update_time: at,
            next_retry_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        self.order.symbol()
    }

    pub fn action(&self) -> OrderSide {
        self.order.side()
    }

    pub fn order_type(&self) -> OrderType {
        self.order.order_type()
    }

    pub fn total_quantity(&self) -> Decimal {
        self.order.quantity()
    }

    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().map(Fill::commission).sum()
    }

    fn status_from_quantities(&self) -> OrderStatus {
        if self.remaining_quantity.is_zero() {
            OrderStatus::Filled
        } else if self.filled_quantity > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Submitted
        }
    }

    fn record_fill(&mut self, fill: Fill) {
        let qty = fill.fill_quantity();
        let new_filled = self.filled_quantity + qty;
        self.avg_fill_price =
            (self.avg_fill_price * self.filled_quantity + fill.fill_price() * qty) / new_filled;
        self.filled_quantity = new_filled;
        self.remaining_quantity = self.total_quantity() - new_filled;
        self.last_update_time = fill.timestamp();
        self.fills.push(fill);
        self.status = self.status_from_quantities();
    }
}

/// Settings for the lifecycle handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_retry_delay_ms: u64,
    /// Width of the dedup time bucket
    pub dedup_window_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            backoff_factor: 2.0,
            max_retry_delay_ms: 300_000,
            dedup_window_secs: 60,
        }
    }
}

impl LifecycleSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            errors.push(format!(
                "lifecycle.backoff_factor must be >= 1, got {}",
                self.backoff_factor
            ));
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            errors.push(format!(
                "lifecycle.max_retry_delay_ms must be >= initial_retry_delay_ms ({}), got {}",
                self.initial_retry_delay_ms, self.max_retry_delay_ms
            ));
        }
        if self.dedup_window_secs == 0 {
            errors.push("lifecycle.dedup_window_secs must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Result of a submission attempt. Rejections are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Accepted(OrderRecord),
    /// Same order already submitted inside the dedup window; the gateway was not contacted
    Duplicate {
        dedup_key: String,
        existing_order_id: String,
    },
    Failed {
        record: OrderRecord,
        retry: RetryDecision,
    },
    /// The gateway answered after the order was closed locally. A venue order id, if any,
    /// is kept on the record so the live order can be traced.
    Closed(OrderRecord),
}

impl SubmissionOutcome {
    pub fn record(&self) -> Option<&OrderRecord> {
        match self {
            SubmissionOutcome::Accepted(record)
            | SubmissionOutcome::Failed { record, .. }
            | SubmissionOutcome::Closed(record) => Some(record),
            SubmissionOutcome::Duplicate { .. } => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted(_))
    }
}

/// A fill applied to an order, plus what each observer made of it
#[derive(Debug, Clone, PartialEq)]
pub struct FillApplied {
    pub record: OrderRecord,
    pub fill: Fill,
    pub deliveries: Vec<ObserverDelivery>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorApplied {
    pub record: OrderRecord,
    pub retry: RetryDecision,
}

#[derive(Debug, Default)]
struct OrderTable {
    orders: HashMap<String, OrderRecord>,
    /// dedup key -> (order id, first seen)
    seen: HashMap<String, (String, DateTime<Utc>)>,
}

impl OrderTable {
    fn get_mut(&mut self, order_id: &str) -> Result<&mut OrderRecord> {
        self.orders.get_mut(order_id).ok_or_else(|| {
            OrderError::NotFound {
                order_id: order_id.to_string(),
            }
            .into()
        })
    }

    /// Drop keys that can no longer collide with a submission at `now`
    fn prune_seen(&mut self, now: DateTime<Utc>, window_secs: u64) {
        let horizon = ChronoDuration::seconds(2 * window_secs as i64);
        self.seen.retain(|_, (_, at)| now - *at < horizon);
    }
}

/// Owns the order table and dedup set. The table lock is never held across a gateway call.
pub struct OrderLifecycleHandler {
    gateway: Arc<dyn ExecutionGateway>,
    settings: LifecycleSettings,
    retry: RetryPolicy,
    table: Mutex<OrderTable>,
    observers: ObserverRegistry,
    audit: Arc<dyn AuditSink>,
}

impl OrderLifecycleHandler {
    pub fn new(gateway: Arc<dyn ExecutionGateway>, settings: LifecycleSettings) -> Self {
        Self {
            gateway,
            retry: settings.retry_policy(),
            settings,
            table: Mutex::new(OrderTable::default()),
            observers: ObserverRegistry::new(),
            audit: Arc::new(NullAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub async fn register_observer(&self, observer: Arc<dyn OrderObserver>) {
        self.observers.register(observer).await;
    }

    // ==================== Submission ====================

    pub async fn submit(&self, order: &Order) -> Result<SubmissionOutcome> {
        self.submit_at(order, Utc::now()).await
    }

    /// Submit with an explicit clock reading for the dedup window
    pub async fn submit_at(&self, order: &Order, at: DateTime<Utc>) -> Result<SubmissionOutcome> {
        let key = dedup_key(order, at, self.settings.dedup_window_secs);

        let record = {
            let mut table = self.table.lock().await;
            table.prune_seen(at, self.settings.dedup_window_secs);
            if let Some((existing, _)) = table.seen.get(&key) {
                info!(
                    symbol = order.symbol(),
                    side = %order.side(),
                    quantity = %order.quantity(),
                    existing_order_id = %existing,
                    "duplicate submission suppressed"
                );
                return Ok(SubmissionOutcome::Duplicate {
                    dedup_key: key,
                    existing_order_id: existing.clone(),
                });
            }

            let order_id = Uuid::new_v4().to_string();
            let record = OrderRecord::new(order_id.clone(), order.clone(), key.clone(), at);
            table.seen.insert(key, (order_id.clone(), at));
            table.orders.insert(order_id, record.clone());
            record
        };
        self.audit.record(AuditEvent::Order {
            record: record.clone(),
        });

        let request = GatewayRequest::for_order(&record.order_id, order, order.quantity());
        let response = self.gateway.submit(request).await;
        self.settle_submission(&record.order_id, response).await
    }

    /// Caller-driven retry of an ERROR order. Bypasses the dedup window since the order id
    /// is unchanged; only the remaining quantity is sent.
    pub async fn resubmit(&self, order_id: &str) -> Result<SubmissionOutcome> {
        let request = {
            let mut table = self.table.lock().await;
            let record = table.get_mut(order_id)?;
            if record.status != OrderStatus::Error {
                return Err(OrderError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: record.status.to_string(),
                    to: OrderStatus::Submitted.to_string(),
                }
                .into());
            }
            if record.next_retry_at.is_none() {
                return Err(OrderError::MaxRetriesExceeded {
                    order_id: order_id.to_string(),
                    attempts: record.retry_count,
                }
                .into());
            }
            GatewayRequest::for_order(order_id, &record.order, record.remaining_quantity)
        };

        debug!(order_id, "resubmitting order");
        let response = self.gateway.submit(request).await;
        self.settle_submission(order_id, response).await
    }

    async fn settle_submission(
        &self,
        order_id: &str,
        response: std::result::Result<OrderHandle, GatewayError>,
    ) -> Result<SubmissionOutcome> {
        let (record, previous, retry) = {
            let mut table = self.table.lock().await;
            let record = table.get_mut(order_id)?;
            let previous = record.status;

            if record.status.is_terminal() {
                // cancelled while the gateway call was in flight
                match response {
                    Ok(handle) => {
                        error!(
                            order_id,
                            status = %record.status,
                            broker_order_id = %handle.broker_order_id,
                            "venue accepted an order that is already closed locally"
                        );
                        record.broker_order_id = Some(handle.broker_order_id);
                        record.last_update_time = Utc::now();
                    }
                    Err(e) => {
                        warn!(order_id, status = %record.status, code = %e.code, "gateway error for closed order ignored");
                    }
                }
                let record = record.clone();
                drop(table);
                self.audit.record(AuditEvent::Order {
                    record: record.clone(),
                });
                return Ok(SubmissionOutcome::Closed(record));
            }

            let retry = match response {
                Ok(handle) => {
                    record.broker_order_id = Some(handle.broker_order_id);
                    record.error_message = None;
                    record.next_retry_at = None;
                    record.status = record.status_from_quantities();
                    record.last_update_time = Utc::now();
                    info!(
                        order_id,
                        symbol = record.symbol(),
                        side = %record.action(),
                        quantity = %record.remaining_quantity,
                        "order submitted"
                    );
                    None
                }
                Err(e) => Some(self.mark_error(record, &e.code, &e.message)),
            };
            (record.clone(), previous, retry)
        };

        self.publish_status(&record, previous).await;
        self.audit.record(AuditEvent::Order {
            record: record.clone(),
        });

        Ok(match retry {
            None => SubmissionOutcome::Accepted(record),
            Some(retry) => SubmissionOutcome::Failed { record, retry },
        })
    }

    // ==================== Venue reports ====================

    /// Apply a (possibly partial) fill reported by the gateway.
    pub async fn apply_fill(
        &self,
        order_id: &str,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
    ) -> Result<FillApplied> {
        let (record, fill, previous) = {
            let mut table = self.table.lock().await;
            let record = table.get_mut(order_id)?;

            if !record.status.accepts_fills() {
                return Err(OrderError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: record.status.to_string(),
                    to: OrderStatus::Filled.to_string(),
                }
                .into());
            }
            if quantity > record.remaining_quantity {
                return Err(OrderError::Overfill {
                    order_id: order_id.to_string(),
                    remaining: record.remaining_quantity,
                    requested: quantity,
                }
                .into());
            }

            let fill = Fill::new(
                record.order.clone(),
                price,
                quantity,
                commission,
                Utc::now(),
                format!("{}-fill-{}", order_id, record.fills.len() + 1),
            )?;
            let previous = record.status;
            record.record_fill(fill.clone());
            (record.clone(), fill, previous)
        };

        info!(
            order_id,
            symbol = record.symbol(),
            quantity = %quantity,
            price = %price,
            filled = %record.filled_quantity,
            remaining = %record.remaining_quantity,
            status = %record.status,
            "fill applied"
        );

        let mut deliveries = self.observers.publish_fill(&record, &fill).await;
        if record.status != previous {
            deliveries.extend(self.observers.publish_status_change(&record, previous).await);
        }
        self.audit.record(AuditEvent::Fill {
            order_id: order_id.to_string(),
            fill: fill.clone(),
        });
        self.audit.record(AuditEvent::Order {
            record: record.clone(),
        });

        Ok(FillApplied {
            record,
            fill,
            deliveries,
        })
    }

    /// Transport or venue error: ERROR status plus a scheduled (not executed) retry.
    pub async fn apply_error(&self, order_id: &str, code: &str, message: &str) -> Result<ErrorApplied> {
        let (record, previous, retry) = {
            let mut table = self.table.lock().await;
            let record = table.get_mut(order_id)?;
            if record.status.is_terminal() {
                return Err(OrderError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: record.status.to_string(),
                    to: OrderStatus::Error.to_string(),
                }
                .into());
            }
            let previous = record.status;
            let retry = self.mark_error(record, code, message);
            (record.clone(), previous, retry)
        };

        self.publish_status(&record, previous).await;
        self.audit.record(AuditEvent::Order {
            record: record.clone(),
        });
        Ok(ErrorApplied { record, retry })
    }

    /// Route a gateway report to the matching handler
    pub async fn apply_event(&self, event: GatewayEvent) -> Result<OrderRecord> {
        match event {
            GatewayEvent::Fill {
                order_id,
                quantity,
                price,
                commission,
            } => Ok(self
                .apply_fill(&order_id, quantity, price, commission)
                .await?
                .record),
            GatewayEvent::Error {
                order_id,
                code,
                message,
            } => Ok(self.apply_error(&order_id, &code, &message).await?.record),
        }
    }

    /// Drain gateway reports until the channel closes. Bad reports are logged and skipped.
    pub async fn run_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<GatewayEvent>) {
        while let Some(event) = events.recv().await {
            let order_id = event.order_id().to_string();
            if let Err(e) = self.apply_event(event).await {
                warn!(order_id = %order_id, "gateway event rejected: {}", e);
            }
        }
        debug!("gateway event channel closed");
    }

    pub async fn cancel(&self, order_id: &str) -> Result<OrderRecord> {
        let (record, previous) = {
            let mut table = self.table.lock().await;
            let record = table.get_mut(order_id)?;
            if record.status.is_terminal() {
                return Err(OrderError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: record.status.to_string(),
                    to: OrderStatus::Cancelled.to_string(),
                }
                .into());
            }
            let previous = record.status;
            record.status = OrderStatus::Cancelled;
            record.next_retry_at = None;
            record.last_update_time = Utc::now();
            (record.clone(), previous)
        };

        info!(order_id, filled = %record.filled_quantity, "order cancelled");
        self.publish_status(&record, previous).await;
        self.audit.record(AuditEvent::Order {
            record: record.clone(),
        });
        Ok(record)
    }

    // ==================== Queries ====================

    pub async fn get(&self, order_id: &str) -> Option<OrderRecord> {
        self.table.lock().await.orders.get(order_id).cloned()
    }

    /// Copy of every record, oldest submission first
    pub async fn snapshot(&self) -> Vec<OrderRecord> {
        let mut records: Vec<_> = self.table.lock().await.orders.values().cloned().collect();
        records.sort_by(|a, b| {
            a.submission_time
                .cmp(&b.submission_time)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        records
    }

    pub async fn active_orders(&self) -> Vec<OrderRecord> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|r| r.status.is_active())
            .collect()
    }

    fn mark_error(&self, record: &mut OrderRecord, code: &str, message: &str) -> RetryDecision {
        let now = Utc::now();
        record.status = OrderStatus::Error;
        record.error_message = Some(format!("[{}] {}", code, message));
        record.last_update_time = now;

        let decision = self.retry.schedule(record.retry_count);
        match &decision {
            RetryDecision::Scheduled { attempt, delay_ms } => {
                record.retry_count = *attempt;
                let delay = ChronoDuration::milliseconds(i64::try_from(*delay_ms).unwrap_or(i64::MAX));
                record.next_retry_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
                warn!(
                    order_id = %record.order_id,
                    code,
                    attempt = *attempt,
                    delay_ms = *delay_ms,
                    "order error, retry scheduled: {}",
                    message
                );
            }
            RetryDecision::Exhausted { attempts } => {
                record.next_retry_at = None;
                error!(
                    order_id = %record.order_id,
                    code,
                    attempts = *attempts,
                    "order error, retries exhausted: {}",
                    message
                );
            }
        }
        decision
    }

    async fn publish_status(&self, record: &OrderRecord, previous: OrderStatus) {
        if record.status == previous {
            return;
        }
        let failed = self
            .observers
            .publish_status_change(record, previous)
            .await
            .into_iter()
            .filter(|d| !d.is_ok())
            .count();
        if failed > 0 {
            debug!(order_id = %record.order_id, failed, "status change delivery had failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::execution::gateway::MockExecutionGateway;
    use crate::persistence::ChannelAuditSink;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    fn accepting() -> MockExecutionGateway {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit().returning(|req| {
            Ok(OrderHandle {
                broker_order_id: format!("b-{}", req.client_order_id),
                accepted_at: Utc::now(),
            })
        });
        gw
    }

    fn failing() -> MockExecutionGateway {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit()
            .returning(|_| Err(GatewayError::new("TIMEOUT", "no ack")));
        gw
    }

    fn handler(gw: MockExecutionGateway) -> OrderLifecycleHandler {
        OrderLifecycleHandler::new(Arc::new(gw), LifecycleSettings::default())
    }

    fn buy(qty: Decimal) -> Order {
        Order::market("AAPL", OrderSide::Buy, qty).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 5).unwrap()
    }

    async fn submitted(h: &OrderLifecycleHandler, qty: Decimal) -> String {
        match h.submit_at(&buy(qty), t0()).await.unwrap() {
            SubmissionOutcome::Accepted(record) => record.order_id,
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let h = handler(accepting());
        let id = submitted(&h, dec!(10)).await;
        let record = h.get(&id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Submitted);
        assert_eq!(record.broker_order_id, Some(format!("b-{}", id)));
        assert_eq!(record.remaining_quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_duplicate_in_window_contacts_gateway_once() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit().times(1).returning(|_| {
            Ok(OrderHandle {
                broker_order_id: "b-1".into(),
                accepted_at: Utc::now(),
            })
        });
        let h = handler(gw);

        let first = h.submit_at(&buy(dec!(10)), t0()).await.unwrap();
        let second = h
            .submit_at(&buy(dec!(10)), t0() + ChronoDuration::seconds(10))
            .await
            .unwrap();

        assert!(first.is_accepted());
        match second {
            SubmissionOutcome::Duplicate {
                existing_order_id, ..
            } => assert_eq!(existing_order_id, first.record().unwrap().order_id),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(h.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_then_complete_fill() {
        let h = handler(accepting());
        let id = submitted(&h, dec!(10)).await;

        let partial = h.apply_fill(&id, dec!(4), dec!(100), dec!(0.4)).await.unwrap();
        assert_eq!(partial.record.status, OrderStatus::PartiallyFilled);
        assert_eq!(partial.record.filled_quantity + partial.record.remaining_quantity, dec!(10));

        let done = h.apply_fill(&id, dec!(6), dec!(105), dec!(0.6)).await.unwrap();
        assert_eq!(done.record.status, OrderStatus::Filled);
        assert_eq!(done.record.avg_fill_price, dec!(103));
        assert_eq!(done.record.total_commission(), dec!(1.0));
        assert_eq!(done.record.fills.len(), 2);

        let err = h.apply_fill(&id, dec!(1), dec!(100), dec!(0)).await.unwrap_err();
        assert!(matches!(err, GateError::Order(OrderError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_overfill_rejected_without_state_change() {
        let h = handler(accepting());
        let id = submitted(&h, dec!(5)).await;
        let err = h.apply_fill(&id, dec!(6), dec!(100), dec!(0)).await.unwrap_err();
        assert!(matches!(err, GateError::Order(OrderError::Overfill { .. })));
        assert_eq!(h.get(&id).await.unwrap().filled_quantity, dec!(0));
    }

    #[tokio::test]
    async fn test_fill_before_acceptance_rejected() {
        let h = handler(failing());
        let outcome = h.submit_at(&buy(dec!(5)), t0()).await.unwrap();
        let id = outcome.record().unwrap().order_id.clone();
        assert!(h.apply_fill(&id, dec!(1), dec!(100), dec!(0)).await.is_err());
        assert!(h.apply_fill("missing", dec!(1), dec!(100), dec!(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_gateway_error_schedules_backoff_until_exhausted() {
        let h = handler(failing());
        let outcome = h.submit_at(&buy(dec!(5)), t0()).await.unwrap();
        let (id, retry) = match outcome {
            SubmissionOutcome::Failed { record, retry } => {
                assert_eq!(record.status, OrderStatus::Error);
                assert_eq!(record.error_message.as_deref(), Some("[TIMEOUT] no ack"));
                (record.order_id, retry)
            }
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(retry, RetryDecision::Scheduled { attempt: 1, delay_ms: 1000 });

        let mut delays = Vec::new();
        for _ in 0..3 {
            match h.resubmit(&id).await.unwrap() {
                SubmissionOutcome::Failed { retry, .. } => delays.push(retry),
                other => panic!("expected failure, got {:?}", other),
            }
        }
        assert_eq!(delays[0], RetryDecision::Scheduled { attempt: 2, delay_ms: 2000 });
        assert_eq!(delays[1], RetryDecision::Scheduled { attempt: 3, delay_ms: 4000 });
        assert_eq!(delays[2], RetryDecision::Exhausted { attempts: 3 });

        let err = h.resubmit(&id).await.unwrap_err();
        assert!(matches!(err, GateError::Order(OrderError::MaxRetriesExceeded { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_resubmit_recovers_and_sends_remaining() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let log = sent.clone();
        let mut calls = 0;
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit().returning(move |req| {
            calls += 1;
            log.lock().unwrap().push(req.quantity);
            if calls == 2 {
                Err(GatewayError::new("DISCONNECT", "socket closed"))
            } else {
                Ok(OrderHandle {
                    broker_order_id: format!("b-{}", calls),
                    accepted_at: Utc::now(),
                })
            }
        });
        let h = handler(gw);
        let id = submitted(&h, dec!(10)).await;
        h.apply_fill(&id, dec!(4), dec!(50), dec!(0)).await.unwrap();

        // venue drops the order, caller retries the remaining quantity
        let applied = h.apply_error(&id, "VENUE", "order dropped").await.unwrap();
        assert_eq!(applied.record.status, OrderStatus::Error);
        assert!(h.resubmit(&id).await.unwrap().record().unwrap().status == OrderStatus::Error);

        let recovered = h.resubmit(&id).await.unwrap();
        let record = recovered.record().unwrap();
        assert_eq!(record.status, OrderStatus::PartiallyFilled);
        assert_eq!(record.error_message, None);
        assert_eq!(sent.lock().unwrap().as_slice(), &[dec!(10), dec!(6), dec!(6)]);
    }

    #[tokio::test]
    async fn test_resubmit_requires_error_status() {
        let h = handler(accepting());
        let id = submitted(&h, dec!(1)).await;
        assert!(h.resubmit(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel() {
        let h = handler(accepting());
        let id = submitted(&h, dec!(3)).await;
        let record = h.cancel(&id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert!(h.cancel(&id).await.is_err());
        assert!(h.active_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_answer_after_cancel_keeps_venue_id() {
        let (sink, mut rx) = ChannelAuditSink::new();
        let h = handler(failing()).with_audit_sink(Arc::new(sink));
        let id = match h.submit_at(&buy(dec!(5)), t0()).await.unwrap() {
            SubmissionOutcome::Failed { record, .. } => record.order_id,
            other => panic!("expected failure, got {:?}", other),
        };
        h.cancel(&id).await.unwrap();
        while rx.try_recv().is_ok() {}

        // the venue acknowledges the in-flight retry only after the local cancel
        let late = Ok(OrderHandle {
            broker_order_id: "venue-late".into(),
            accepted_at: Utc::now(),
        });
        let outcome = h.settle_submission(&id, late).await.unwrap();

        match &outcome {
            SubmissionOutcome::Closed(record) => {
                assert_eq!(record.status, OrderStatus::Cancelled);
                assert_eq!(record.broker_order_id.as_deref(), Some("venue-late"));
            }
            other => panic!("expected closed, got {:?}", other),
        }
        assert!(!outcome.is_accepted());
        let stored = h.get(&id).await.unwrap();
        assert_eq!(stored.broker_order_id.as_deref(), Some("venue-late"));
        assert_eq!(rx.try_recv().unwrap().event.kind(), "order");
    }

    #[tokio::test]
    async fn test_many_retries_never_overflow_the_schedule() {
        let settings = LifecycleSettings {
            max_retries: 80,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            ..LifecycleSettings::default()
        };
        assert!(settings.validate().is_ok());
        let h = OrderLifecycleHandler::new(Arc::new(failing()), settings);
        let id = match h.submit_at(&buy(dec!(1)), t0()).await.unwrap() {
            SubmissionOutcome::Failed { record, .. } => record.order_id,
            other => panic!("expected failure, got {:?}", other),
        };
        for _ in 0..75 {
            assert!(matches!(
                h.resubmit(&id).await.unwrap(),
                SubmissionOutcome::Failed { .. }
            ));
        }
        let record = h.get(&id).await.unwrap();
        assert_eq!(record.retry_count, 76);
        let wait = record.next_retry_at.unwrap() - record.last_update_time;
        assert!(wait <= ChronoDuration::milliseconds(60_000));
    }

    #[test]
    fn test_validate_rejects_non_finite_backoff() {
        for factor in [f64::NAN, f64::INFINITY, 0.5] {
            let settings = LifecycleSettings {
                backoff_factor: factor,
                ..LifecycleSettings::default()
            };
            let errors = settings.validate().unwrap_err();
            assert!(errors[0].contains("backoff_factor"));
        }
        let capped_below_start = LifecycleSettings {
            max_retry_delay_ms: 10,
            ..LifecycleSettings::default()
        };
        assert!(capped_below_start.validate().is_err());
    }

    struct Failing;

    impl OrderObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_fill(&self, _: &OrderRecord, _: &Fill) -> Result<()> {
            Err(GateError::Internal("observer crashed".into()))
        }
    }

    #[derive(Default)]
    struct Recording(StdMutex<Vec<String>>);

    impl OrderObserver for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn on_fill(&self, _: &OrderRecord, fill: &Fill) -> Result<()> {
            self.0.lock().unwrap().push(fill.fill_id().to_string());
            Ok(())
        }

        fn on_status_change(&self, record: &OrderRecord, previous: OrderStatus) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}->{}", previous, record.status));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_observer_isolated() {
        let h = handler(accepting());
        let recording = Arc::new(Recording::default());
        h.register_observer(Arc::new(Failing)).await;
        h.register_observer(recording.clone()).await;

        let id = submitted(&h, dec!(2)).await;
        let applied = h.apply_fill(&id, dec!(2), dec!(10), dec!(0)).await.unwrap();

        // fill + status change for each of the two observers
        assert_eq!(applied.deliveries.len(), 4);
        assert_eq!(applied.deliveries.iter().filter(|d| !d.is_ok()).count(), 1);
        assert_eq!(applied.record.status, OrderStatus::Filled);

        let seen = recording.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "PENDING->SUBMITTED".to_string(),
                format!("{}-fill-1", id),
                "SUBMITTED->FILLED".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_reach_audit_sink_and_event_loop() {
        let (sink, mut rx) = ChannelAuditSink::new();
        let h = Arc::new(handler(accepting()).with_audit_sink(Arc::new(sink)));
        let id = submitted(&h, dec!(2)).await;

        let (tx, events) = mpsc::unbounded_channel();
        tx.send(GatewayEvent::Fill {
            order_id: id.clone(),
            quantity: dec!(2),
            price: dec!(10),
            commission: dec!(0.01),
        })
        .unwrap();
        tx.send(GatewayEvent::Fill {
            order_id: "unknown".into(),
            quantity: dec!(1),
            price: dec!(10),
            commission: dec!(0),
        })
        .unwrap();
        drop(tx);
        h.clone().run_event_loop(events).await;

        assert_eq!(h.get(&id).await.unwrap().status, OrderStatus::Filled);

        let mut kinds = Vec::new();
        while let Ok(record) = rx.try_recv() {
            kinds.push(record.event.kind());
        }
        assert_eq!(kinds, vec!["order", "order", "fill", "order"]);
    }
}
