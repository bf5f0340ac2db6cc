//! Signal Execution Pipeline
//!
//! Turns a trading signal into a live order:
//! 1. Portfolio-level risk check (drawdown, circuit breaker, cash, position count)
//! 2. Signal quality floor
//! 3. Deployment-fraction ceiling
//! 4. Volatility-aware sizing
//! 5. Submission through the order lifecycle handler
//!
//! Each stage short-circuits on rejection. Every outcome is recorded and announced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::portfolio::{AccountSnapshot, PortfolioSource};
use crate::domain::{rank_by_quality, Order, OrderSide, TradingSignal};
use crate::error::Result;
use crate::execution::{OrderLifecycleHandler, SubmissionOutcome};
use crate::risk::{RiskDetails, RiskManager};
use crate::supervisor::{Notification, NotificationHub, Severity};

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Signals scoring below this are rejected
    pub min_signal_quality: Decimal,
    /// No new positions once deployed / portfolio value reaches this
    pub max_deployed_pct: Decimal,
    /// Per-position ceiling as a fraction of portfolio value
    pub max_position_pct: Decimal,
    pub sharpe_cap: Decimal,
    /// Approve and size, but never submit
    pub dry_run: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_signal_quality: dec!(0.3),
            max_deployed_pct: dec!(0.80),
            max_position_pct: dec!(0.10),
            sharpe_cap: dec!(2.0),
            dry_run: false,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("min_signal_quality", self.min_signal_quality),
            ("max_deployed_pct", self.max_deployed_pct),
            ("max_position_pct", self.max_position_pct),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                errors.push(format!("pipeline.{} must be within [0, 1]", name));
            }
        }
        if self.sharpe_cap <= Decimal::ZERO {
            errors.push("pipeline.sharpe_cap must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Passed every check; not submitted (dry run)
    Approved,
    Rejected,
    Executed,
    /// Submission attempted and refused by the gateway
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Approved => "APPROVED",
            ExecutionStatus::Rejected => "REJECTED",
            ExecutionStatus::Executed => "EXECUTED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    /// Approved or executed signals consume deployment budget
    pub fn commits_capital(&self) -> bool {
        matches!(self, ExecutionStatus::Approved | ExecutionStatus::Executed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one pipeline decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub symbol: String,
    pub side: OrderSide,
    pub strategy: String,
    pub status: ExecutionStatus,
    pub reason: String,
    pub quality: Decimal,
    pub order_id: Option<String>,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub details: RiskDetails,
    /// Severity the outcome was announced with
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    fn new(signal: &TradingSignal, quality: Decimal, status: ExecutionStatus, reason: String) -> Self {
        Self {
            symbol: signal.symbol().to_string(),
            side: signal.side(),
            strategy: signal.strategy_name().to_string(),
            status,
            reason,
            quality,
            order_id: None,
            quantity: Decimal::ZERO,
            notional: Decimal::ZERO,
            details: RiskDetails::new(),
            severity: Severity::Info,
            timestamp: Utc::now(),
        }
    }

    fn rejected(signal: &TradingSignal, quality: Decimal, reason: String, details: RiskDetails) -> Self {
        Self {
            details,
            severity: Severity::Warning,
            ..Self::new(signal, quality, ExecutionStatus::Rejected, reason)
        }
    }

    fn sized(mut self, quantity: Decimal, price: Decimal) -> Self {
        self.quantity = quantity;
        self.notional = quantity * price;
        self
    }

    pub fn is_executed(&self) -> bool {
        self.status == ExecutionStatus::Executed
    }

    pub fn is_rejected(&self) -> bool {
        self.status == ExecutionStatus::Rejected
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct SignalPipeline {
    settings: PipelineSettings,
    risk: Arc<RiskManager>,
    lifecycle: Arc<OrderLifecycleHandler>,
    portfolio: Arc<dyn PortfolioSource>,
    notifications: Arc<NotificationHub>,
    results: Mutex<Vec<ExecutionResult>>,
}

impl SignalPipeline {
    pub fn new(
        settings: PipelineSettings,
        risk: Arc<RiskManager>,
        lifecycle: Arc<OrderLifecycleHandler>,
        portfolio: Arc<dyn PortfolioSource>,
        notifications: Arc<NotificationHub>,
    ) -> Self {
        Self {
            settings,
            risk,
            lifecycle,
            portfolio,
            notifications,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Every result produced so far, oldest first
    pub async fn results(&self) -> Vec<ExecutionResult> {
        self.results.lock().await.clone()
    }

    /// Run one signal through every gate against a fresh account snapshot
    pub async fn process_signal(&self, signal: &TradingSignal) -> Result<ExecutionResult> {
        let account = self.portfolio.snapshot().await?;
        let result = self.evaluate(signal, &account, Decimal::ZERO).await?;
        Ok(self.finish(result).await)
    }

    /// Rank by quality and process in order against one snapshot. Notional approved earlier
    /// in the batch counts as deployed. Once the deployment limit is reached every remaining
    /// signal is rejected without evaluation.
    pub async fn process_batch(&self, mut signals: Vec<TradingSignal>) -> Result<Vec<ExecutionResult>> {
        rank_by_quality(&mut signals, self.settings.sharpe_cap);
        let account = self.portfolio.snapshot().await?;
        let mut committed = Decimal::ZERO;
        let mut results = Vec::with_capacity(signals.len());

        info!(signals = signals.len(), "processing signal batch");

        for signal in &signals {
            let quality = signal.quality_score_with_cap(self.settings.sharpe_cap);
            let deployed = account.deployment_fraction(committed);

            let result = if deployed >= self.settings.max_deployed_pct {
                ExecutionResult::rejected(
                    signal,
                    quality,
                    format!(
                        "Deployment limit reached: {:.4} of {} deployed; batch stopped",
                        deployed, self.settings.max_deployed_pct
                    ),
                    deployment_details(deployed, self.settings.max_deployed_pct),
                )
            } else {
                self.evaluate(signal, &account, committed).await?
            };

            if result.status.commits_capital() {
                committed += result.notional;
            }
            results.push(self.finish(result).await);
        }

        let executed = results.iter().filter(|r| r.status.commits_capital()).count();
        info!(
            executed,
            rejected = results.len() - executed,
            committed = %committed,
            "signal batch complete"
        );
        Ok(results)
    }

    async fn evaluate(
        &self,
        signal: &TradingSignal,
        account: &AccountSnapshot,
        committed: Decimal,
    ) -> Result<ExecutionResult> {
        let s = &self.settings;
        let quality = signal.quality_score_with_cap(s.sharpe_cap);

        // 1. Portfolio risk
        let check = self
            .risk
            .check_portfolio_risk(
                account.portfolio_value,
                account.peak_value,
                account.cash,
                &account.positions,
            )
            .await;
        if check.is_rejected() {
            let mut result =
                ExecutionResult::rejected(signal, quality, check.reason.clone(), check.details);
            if check.severity == Severity::Critical {
                result.severity = Severity::Critical;
            }
            return Ok(result);
        }

        // 2. Quality floor
        if quality < s.min_signal_quality {
            return Ok(ExecutionResult::rejected(
                signal,
                quality,
                format!(
                    "Signal quality {:.4} below minimum {}",
                    quality, s.min_signal_quality
                ),
                RiskDetails::from([
                    ("quality".to_string(), json!(quality)),
                    ("min_signal_quality".to_string(), json!(s.min_signal_quality)),
                ]),
            ));
        }

        // 3. Deployment
        let deployed = account.deployment_fraction(committed);
        if deployed >= s.max_deployed_pct {
            return Ok(ExecutionResult::rejected(
                signal,
                quality,
                format!(
                    "Deployment limit reached: {:.4} of {} deployed",
                    deployed, s.max_deployed_pct
                ),
                deployment_details(deployed, s.max_deployed_pct),
            ));
        }

        // 4. Sizing
        let volatility = self.portfolio.volatility(signal.symbol()).await;
        let dollars = self
            .risk
            .calculate_position_size(quality, account.portfolio_value, volatility)
            .min(s.max_position_pct * account.portfolio_value);
        let price = signal.entry_price();
        let quantity = (dollars / price).floor();
        let mut details = RiskDetails::from([
            ("allocation".to_string(), json!(dollars.round_dp(2))),
            ("deployment".to_string(), json!(deployed)),
            ("volatility".to_string(), json!(volatility)),
        ]);
        if quantity <= Decimal::ZERO {
            return Ok(ExecutionResult::rejected(
                signal,
                quality,
                format!("Position size {} buys no whole shares at {}", dollars.round_dp(2), price),
                details,
            ));
        }

        if s.dry_run {
            let mut result = ExecutionResult::new(
                signal,
                quality,
                ExecutionStatus::Approved,
                "Approved (dry run)".to_string(),
            )
            .sized(quantity, price);
            result.details = details;
            return Ok(result);
        }

        // 5. Submission
        let order = Order::market(signal.symbol(), signal.side(), quantity)?;
        let outcome = self.lifecycle.submit(&order).await?;
        let result = match outcome {
            SubmissionOutcome::Accepted(record) => {
                details.insert("broker_order_id".to_string(), json!(record.broker_order_id));
                let mut result = ExecutionResult::new(
                    signal,
                    quality,
                    ExecutionStatus::Executed,
                    format!("Submitted {} {} {}", signal.side(), quantity, signal.symbol()),
                )
                .sized(quantity, price);
                result.order_id = Some(record.order_id);
                result.details = details;
                result
            }
            SubmissionOutcome::Duplicate {
                dedup_key,
                existing_order_id,
            } => {
                details.insert("dedup_key".to_string(), json!(dedup_key));
                details.insert("existing_order_id".to_string(), json!(existing_order_id));
                ExecutionResult::rejected(
                    signal,
                    quality,
                    "Duplicate submission inside the dedup window".to_string(),
                    details,
                )
            }
            SubmissionOutcome::Failed { record, retry } => {
                details.insert("retry".to_string(), json!(retry));
                let mut result = ExecutionResult::new(
                    signal,
                    quality,
                    ExecutionStatus::Failed,
                    record
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "gateway rejected the order".to_string()),
                )
                .sized(quantity, price);
                result.order_id = Some(record.order_id);
                result.details = details;
                result.severity = Severity::Error;
                result
            }
            SubmissionOutcome::Closed(record) => {
                details.insert("broker_order_id".to_string(), json!(record.broker_order_id));
                let mut result = ExecutionResult::new(
                    signal,
                    quality,
                    ExecutionStatus::Failed,
                    format!("Order {} closed before the gateway answered", record.status),
                )
                .sized(quantity, price);
                result.order_id = Some(record.order_id);
                result.details = details;
                result.severity = Severity::Error;
                result
            }
        };
        Ok(result)
    }

    /// Record and announce a result
    async fn finish(&self, result: ExecutionResult) -> ExecutionResult {
        match result.status {
            ExecutionStatus::Rejected => {
                warn!(symbol = %result.symbol, strategy = %result.strategy, "signal rejected: {}", result.reason)
            }
            ExecutionStatus::Failed => {
                warn!(symbol = %result.symbol, strategy = %result.strategy, "signal execution failed: {}", result.reason)
            }
            _ => info!(
                symbol = %result.symbol,
                side = %result.side,
                quantity = %result.quantity,
                status = %result.status,
                "signal {}",
                result.reason
            ),
        }

        let title = format!("Signal {}: {} {}", result.status, result.side, result.symbol);
        let metadata = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        let notification =
            Notification::new(result.severity, title, result.reason.clone()).with_metadata(metadata);
        let reports = self.notifications.broadcast(notification).await;
        debug!(deliveries = reports.len(), "pipeline notification sent");

        self.results.lock().await.push(result.clone());
        result
    }
}

fn deployment_details(deployed: Decimal, limit: Decimal) -> RiskDetails {
    RiskDetails::from([
        ("deployment".to_string(), json!(deployed)),
        ("max_deployed_pct".to_string(), json!(limit)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::execution::{LifecycleSettings, MockExecutionGateway, PaperGateway};
    use crate::pipeline::portfolio::SharedAccount;
    use crate::risk::RiskSettings;

    fn signal(symbol: &str, confidence: Decimal, sharpe: Decimal) -> TradingSignal {
        TradingSignal::new(symbol, OrderSide::Buy, confidence, sharpe, dec!(100), "test").unwrap()
    }

    fn pipeline_with(
        settings: PipelineSettings,
        gateway: Arc<dyn crate::execution::ExecutionGateway>,
        account: AccountSnapshot,
    ) -> (SignalPipeline, Arc<NotificationHub>) {
        let hub = Arc::new(NotificationHub::new());
        let risk = RiskSettings {
            volatility_targeting: false,
            max_position_size: dec!(0.10),
            ..RiskSettings::default()
        };
        let pipeline = SignalPipeline::new(
            settings,
            Arc::new(RiskManager::new(risk)),
            Arc::new(OrderLifecycleHandler::new(gateway, LifecycleSettings::default())),
            Arc::new(SharedAccount::new(account)),
            hub.clone(),
        );
        (pipeline, hub)
    }

    #[tokio::test]
    async fn test_executes_sized_order() {
        let (pipeline, hub) = pipeline_with(
            PipelineSettings::default(),
            Arc::new(PaperGateway::new()),
            AccountSnapshot::new(dec!(100000)),
        );
        let mut events = hub.subscribe();

        let result = pipeline
            .process_signal(&signal("AAPL", dec!(1), dec!(2)))
            .await
            .unwrap();
        // 1.0 × 0.10 × 100000 = 10000 -> 100 shares at 100
        assert_eq!(result.status, ExecutionStatus::Executed);
        assert_eq!(result.quantity, dec!(100));
        assert_eq!(result.notional, dec!(10000));
        assert!(result.order_id.is_some());
        assert_eq!(events.recv().await.unwrap().severity, Severity::Info);
        assert_eq!(pipeline.results().await.len(), 1);
    }

    #[tokio::test]
    async fn test_quality_floor() {
        let (pipeline, _) = pipeline_with(
            PipelineSettings::default(),
            Arc::new(PaperGateway::new()),
            AccountSnapshot::new(dec!(100000)),
        );
        // 0.5 × min(1/2, 1) = 0.25 < 0.3
        let result = pipeline
            .process_signal(&signal("AAPL", dec!(0.5), dec!(1)))
            .await
            .unwrap();
        assert!(result.is_rejected());
        assert!(result.reason.contains("below minimum"));
        assert_eq!(result.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_breaker_rejection_is_critical() {
        let account = AccountSnapshot {
            portfolio_value: dec!(80000),
            peak_value: dec!(100000),
            cash: dec!(80000),
            positions: Default::default(),
        };
        let (pipeline, _) =
            pipeline_with(PipelineSettings::default(), Arc::new(PaperGateway::new()), account);
        // Drawdown 0.20 is above the 0.15 breaker threshold but not above the 0.20 maximum
        let result = pipeline
            .process_signal(&signal("AAPL", dec!(1), dec!(2)))
            .await
            .unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_recorded() {
        let mut gateway = MockExecutionGateway::new();
        gateway
            .expect_submit()
            .returning(|_| Err(GatewayError::new("REJECTED", "market closed")));
        let (pipeline, _) = pipeline_with(
            PipelineSettings::default(),
            Arc::new(gateway),
            AccountSnapshot::new(dec!(100000)),
        );
        let result = pipeline
            .process_signal(&signal("AAPL", dec!(1), dec!(2)))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.severity, Severity::Error);
        assert!(result.details.contains_key("retry"));
    }

    #[tokio::test]
    async fn test_dry_run_never_submits() {
        let mut gateway = MockExecutionGateway::new();
        gateway.expect_submit().never();
        let settings = PipelineSettings {
            dry_run: true,
            ..PipelineSettings::default()
        };
        let (pipeline, _) =
            pipeline_with(settings, Arc::new(gateway), AccountSnapshot::new(dec!(100000)));
        let result = pipeline
            .process_signal(&signal("AAPL", dec!(1), dec!(2)))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Approved);
        assert_eq!(result.quantity, dec!(100));
    }

    #[tokio::test]
    async fn test_batch_stops_at_deployment_limit() {
        let settings = PipelineSettings {
            max_deployed_pct: dec!(0.05),
            min_signal_quality: Decimal::ZERO,
            ..PipelineSettings::default()
        };
        let (pipeline, _) = pipeline_with(
            settings,
            Arc::new(PaperGateway::new()),
            AccountSnapshot::new(dec!(100000)),
        );
        let results = pipeline
            .process_batch(vec![
                signal("LOW", dec!(0.2), dec!(2)),
                signal("HIGH", dec!(0.6), dec!(2)),
                signal("MID", dec!(0.4), dec!(2)),
            ])
            .await
            .unwrap();

        // HIGH commits 6000 of 100000, past the 0.05 ceiling
        assert_eq!(results[0].symbol, "HIGH");
        assert!(results[0].is_executed());
        for r in &results[1..] {
            assert!(r.is_rejected());
            assert!(r.reason.contains("Deployment limit"));
        }
    }
}
