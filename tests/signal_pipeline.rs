use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tradegate::domain::{OrderSide, TradingSignal};
use tradegate::error::GatewayError;
use tradegate::execution::{
    ExecutionGateway, GatewayEvent, GatewayRequest, LifecycleSettings, OrderHandle,
    OrderLifecycleHandler, OrderStatus, PaperGateway, SubmissionOutcome,
};
use tradegate::persistence::ChannelAuditSink;
use tradegate::pipeline::{
    AccountSnapshot, ExecutionStatus, PipelineSettings, SharedAccount, SignalPipeline,
};
use tradegate::risk::{RiskManager, RiskSettings};
use tradegate::supervisor::{Notification, NotificationHub, Notifier, Severity};

/// Refuses the first `failures` submissions, then accepts everything
struct FlakyGateway {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyGateway {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionGateway for FlakyGateway {
    async fn submit(&self, request: GatewayRequest) -> Result<OrderHandle, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(GatewayError::new("TIMEOUT", "no ack from venue"));
        }
        Ok(OrderHandle {
            broker_order_id: format!("venue-{}", request.client_order_id),
            accepted_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> tradegate::Result<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    pipeline: SignalPipeline,
    lifecycle: Arc<OrderLifecycleHandler>,
    account: Arc<SharedAccount>,
    risk: Arc<RiskManager>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(
    settings: PipelineSettings,
    gateway: Arc<dyn ExecutionGateway>,
    audit: Option<ChannelAuditSink>,
) -> Harness {
    let mut risk = RiskManager::new(RiskSettings {
        volatility_targeting: false,
        max_position_size: dec!(0.10),
        ..RiskSettings::default()
    });
    let mut lifecycle = OrderLifecycleHandler::new(gateway, LifecycleSettings::default());
    if let Some(sink) = audit {
        let sink = Arc::new(sink);
        risk = risk.with_audit_sink(sink.clone());
        lifecycle = lifecycle.with_audit_sink(sink);
    }
    let risk = Arc::new(risk);
    let lifecycle = Arc::new(lifecycle);
    let account = Arc::new(SharedAccount::new(AccountSnapshot::new(dec!(100000))));
    let notifier = Arc::new(RecordingNotifier::default());
    let hub = Arc::new(NotificationHub::new().with_notifier(notifier.clone()));

    let pipeline = SignalPipeline::new(
        settings,
        risk.clone(),
        lifecycle.clone(),
        account.clone(),
        hub,
    );
    Harness {
        pipeline,
        lifecycle,
        account,
        risk,
        notifier,
    }
}

fn buy(symbol: &str, confidence: Decimal, strategy: &str) -> TradingSignal {
    TradingSignal::new(symbol, OrderSide::Buy, confidence, dec!(2), dec!(100), strategy).unwrap()
}

#[tokio::test]
async fn second_signal_is_rejected_once_deployment_limit_is_reached() {
    let settings = PipelineSettings {
        min_signal_quality: dec!(0.1),
        max_deployed_pct: dec!(0.05),
        ..PipelineSettings::default()
    };
    let h = harness(settings, Arc::new(PaperGateway::new()), None);

    let results = h
        .pipeline
        .process_batch(vec![
            buy("WEAK", dec!(0.2), "mean_reversion"),
            buy("STRONG", dec!(0.6), "momentum"),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].symbol, "STRONG");
    assert_eq!(results[0].status, ExecutionStatus::Executed);
    assert_eq!(results[0].quantity, dec!(60));
    assert_eq!(results[0].notional, dec!(6000));

    assert_eq!(results[1].symbol, "WEAK");
    assert_eq!(results[1].status, ExecutionStatus::Rejected);
    assert!(results[1].reason.contains("Deployment limit"));

    // Both outcomes are recorded and announced, none dropped
    assert_eq!(h.pipeline.results().await.len(), 2);
    let seen = h.notifier.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].severity, Severity::Warning);
}

#[tokio::test]
async fn failed_submission_is_retried_and_filled() {
    let (audit, mut audit_rx) = ChannelAuditSink::new();
    let h = harness(
        PipelineSettings::default(),
        Arc::new(FlakyGateway::new(1)),
        Some(audit),
    );
    let lifecycle = &h.lifecycle;

    let result = h
        .pipeline
        .process_signal(&buy("AAPL", dec!(0.8), "momentum"))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.severity, Severity::Error);
    assert!(result.details.contains_key("retry"));
    let order_id = result.order_id.clone().unwrap();

    let record = lifecycle.get(&order_id).await.unwrap();
    assert_eq!(record.status, OrderStatus::Error);
    assert!(record.next_retry_at.is_some());

    let outcome = lifecycle.resubmit(&order_id).await.unwrap();
    assert!(matches!(outcome, SubmissionOutcome::Accepted(_)));

    let record = lifecycle
        .apply_event(GatewayEvent::Fill {
            order_id: order_id.clone(),
            quantity: result.quantity,
            price: dec!(100),
            commission: dec!(1),
        })
        .await
        .unwrap();
    assert_eq!(record.status, OrderStatus::Filled);
    assert_eq!(record.remaining_quantity, Decimal::ZERO);
    assert_eq!(record.filled_quantity, result.quantity);

    let mut kinds = Vec::new();
    while let Ok(entry) = audit_rx.try_recv() {
        kinds.push(entry.event.kind());
    }
    assert!(kinds.contains(&"order"));
    assert!(kinds.contains(&"fill"));
    assert_eq!(h.notifier.seen.lock().unwrap()[0].severity, Severity::Error);
}

#[tokio::test]
async fn circuit_breaker_halts_until_reset() {
    let (audit, mut audit_rx) = ChannelAuditSink::new();
    let h = harness(
        PipelineSettings::default(),
        Arc::new(PaperGateway::new()),
        Some(audit),
    );
    h.account
        .update(AccountSnapshot {
            portfolio_value: dec!(100000),
            peak_value: dec!(100000),
            cash: dec!(100000),
            positions: HashMap::new(),
        })
        .await;
    h.account
        .update(AccountSnapshot {
            portfolio_value: dec!(82000),
            peak_value: dec!(82000),
            cash: dec!(82000),
            positions: HashMap::new(),
        })
        .await;

    let tripped = h
        .pipeline
        .process_signal(&buy("AAPL", dec!(0.8), "momentum"))
        .await
        .unwrap();
    assert_eq!(tripped.status, ExecutionStatus::Rejected);
    assert_eq!(tripped.severity, Severity::Critical);
    assert!(h.risk.is_tripped().await);
    let breach = audit_rx.try_recv().unwrap();
    assert_eq!(breach.event.kind(), "risk_breach");

    // Recovery alone does not clear the breaker
    h.account.update(AccountSnapshot::new(dec!(100000))).await;
    let halted = h
        .pipeline
        .process_signal(&buy("MSFT", dec!(0.8), "momentum"))
        .await
        .unwrap();
    assert_eq!(halted.status, ExecutionStatus::Rejected);
    assert!(halted.reason.contains("Circuit breaker active"));

    h.risk.reset_circuit_breaker().await;
    let resumed = h
        .pipeline
        .process_signal(&buy("MSFT", dec!(0.8), "momentum"))
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Executed);
}
