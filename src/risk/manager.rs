//! Risk manager
//!
//! Portfolio and position checks, correlation limits, volatility-targeted sizing
//! and a sticky circuit breaker:
//! - portfolio: drawdown, breaker trip, cash buffer, position count
//! - position: size ceiling, position-level stop loss
//! - correlation: count of highly correlated holdings

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::result::{RiskBreach, RiskCheckKind, RiskCheckResult, RiskDetails};
use crate::analysis::stats::{pct_changes, pearson, to_f64};
use crate::domain::Position;
use crate::persistence::{AuditEvent, AuditSink, NullAuditSink};
use crate::supervisor::Severity;

const MIN_VOL_SCALE: Decimal = dec!(0.1);
const MAX_VOL_SCALE: Decimal = dec!(2.0);
const MAX_CIRCUIT_EVENTS: usize = 100;

/// Risk limits. All fractions are of portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Drawdown beyond which every portfolio check is rejected
    pub max_portfolio_drawdown: Decimal,
    pub circuit_breaker_enabled: bool,
    /// Drawdown at which the breaker trips
    pub circuit_breaker_threshold: Decimal,
    pub min_cash_buffer: Decimal,
    pub max_cash_buffer: Decimal,
    pub max_positions: usize,
    /// Largest single position
    pub max_position_size: Decimal,
    /// Position-level stop, as a loss fraction from entry
    pub stop_loss_pct: Decimal,
    pub volatility_targeting: bool,
    /// Annualized volatility the sizing scales toward
    pub target_volatility: Decimal,
    pub correlation_threshold: Decimal,
    pub max_correlated_positions: usize,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_portfolio_drawdown: dec!(0.20),
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: dec!(0.15),
            min_cash_buffer: dec!(0.05),
            max_cash_buffer: dec!(1.0),
            max_positions: 10,
            max_position_size: dec!(0.10),
            stop_loss_pct: dec!(0.05),
            volatility_targeting: true,
            target_volatility: dec!(0.15),
            correlation_threshold: dec!(0.70),
            max_correlated_positions: 3,
        }
    }
}

impl RiskSettings {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let fraction = |name: &str, v: Decimal, errors: &mut Vec<String>| {
            if v < Decimal::ZERO || v > Decimal::ONE {
                errors.push(format!("risk.{} must be within [0, 1], got {}", name, v));
            }
        };
        fraction("max_portfolio_drawdown", self.max_portfolio_drawdown, &mut errors);
        fraction("circuit_breaker_threshold", self.circuit_breaker_threshold, &mut errors);
        fraction("min_cash_buffer", self.min_cash_buffer, &mut errors);
        fraction("max_cash_buffer", self.max_cash_buffer, &mut errors);
        fraction("max_position_size", self.max_position_size, &mut errors);
        fraction("stop_loss_pct", self.stop_loss_pct, &mut errors);
        fraction("correlation_threshold", self.correlation_threshold, &mut errors);

        if self.min_cash_buffer > self.max_cash_buffer {
            errors.push("risk.min_cash_buffer must not exceed risk.max_cash_buffer".to_string());
        }
        if self.max_positions == 0 {
            errors.push("risk.max_positions must be at least 1".to_string());
        }
        if self.volatility_targeting && self.target_volatility <= Decimal::ZERO {
            errors.push("risk.target_volatility must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Circuit breaker state. `Tripped` is a trap state left only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakerState {
    #[default]
    Normal,
    Tripped,
}

/// Circuit breaker transitions (for audit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub state: BreakerState,
}

#[derive(Debug, Default)]
struct RiskState {
    breaker: BreakerState,
    breaches: Vec<RiskBreach>,
    /// bounded
    circuit_events: Vec<CircuitBreakerEvent>,
}

impl RiskState {
    fn record(&mut self, check: RiskCheckKind, result: &RiskCheckResult) -> RiskBreach {
        let breach = RiskBreach::from_result(check, result);
        self.breaches.push(breach.clone());
        breach
    }

    fn push_circuit_event(&mut self, reason: String, state: BreakerState) {
        self.circuit_events.push(CircuitBreakerEvent {
            timestamp: Utc::now(),
            reason,
            state,
        });
        if self.circuit_events.len() > MAX_CIRCUIT_EVENTS {
            let drain = self.circuit_events.len() - MAX_CIRCUIT_EVENTS;
            self.circuit_events.drain(0..drain);
        }
    }
}

/// Stateful risk gatekeeper.
///
/// Breaker state and the breach log sit behind one mutex so a check-then-trip sequence
/// is atomic across concurrent callers.
pub struct RiskManager {
    settings: RiskSettings,
    state: Mutex<RiskState>,
    audit: Arc<dyn AuditSink>,
}

impl RiskManager {
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(RiskState::default()),
            audit: Arc::new(NullAuditSink),
        }
    }

    /// Every breach is also handed to `sink`
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    // ==================== Portfolio ====================

    /// Portfolio-level gate. Checks run in a fixed order and stop at the first rejection.
    pub async fn check_portfolio_risk(
        &self,
        portfolio_value: Decimal,
        peak_value: Decimal,
        cash: Decimal,
        positions: &HashMap<String, Position>,
    ) -> RiskCheckResult {
        let mut state = self.state.lock().await;
        let s = &self.settings;

        if portfolio_value <= Decimal::ZERO {
            let result = RiskCheckResult::reject(
                format!("Portfolio value {} is not positive", portfolio_value),
                Severity::Error,
                details([("portfolio_value", json!(portfolio_value))]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        if state.breaker == BreakerState::Tripped {
            let result = RiskCheckResult::reject(
                "Circuit breaker active: trading halted until reset",
                Severity::Critical,
                details([("breaker", json!(BreakerState::Tripped))]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        let drawdown = if peak_value > Decimal::ZERO {
            (peak_value - portfolio_value) / peak_value
        } else {
            Decimal::ZERO
        };

        if drawdown > s.max_portfolio_drawdown {
            let result = RiskCheckResult::reject(
                format!(
                    "Drawdown {:.4} exceeds maximum {}",
                    drawdown, s.max_portfolio_drawdown
                ),
                Severity::Warning,
                details([
                    ("drawdown", json!(drawdown)),
                    ("max_portfolio_drawdown", json!(s.max_portfolio_drawdown)),
                    ("peak_value", json!(peak_value)),
                    ("portfolio_value", json!(portfolio_value)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        if s.circuit_breaker_enabled && drawdown >= s.circuit_breaker_threshold {
            let reason = format!(
                "CRITICAL: circuit breaker tripped at drawdown {:.4} (threshold {})",
                drawdown, s.circuit_breaker_threshold
            );
            error!("CIRCUIT BREAKER TRIGGERED: {}", reason);
            state.breaker = BreakerState::Tripped;
            state.push_circuit_event(reason.clone(), BreakerState::Tripped);
            let result = RiskCheckResult::reject(
                reason,
                Severity::Critical,
                details([
                    ("drawdown", json!(drawdown)),
                    ("circuit_breaker_threshold", json!(s.circuit_breaker_threshold)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        let cash_ratio = cash / portfolio_value;
        if cash_ratio < s.min_cash_buffer {
            let result = RiskCheckResult::reject(
                format!(
                    "Cash buffer {:.4} below minimum {}",
                    cash_ratio, s.min_cash_buffer
                ),
                Severity::Warning,
                details([
                    ("cash_ratio", json!(cash_ratio)),
                    ("min_cash_buffer", json!(s.min_cash_buffer)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }
        if cash_ratio > s.max_cash_buffer {
            let result = RiskCheckResult::reject(
                format!(
                    "Cash buffer {:.4} above maximum {}",
                    cash_ratio, s.max_cash_buffer
                ),
                Severity::Warning,
                details([
                    ("cash_ratio", json!(cash_ratio)),
                    ("max_cash_buffer", json!(s.max_cash_buffer)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        let position_count = positions.values().filter(|p| !p.is_flat()).count();
        if position_count >= s.max_positions {
            let result = RiskCheckResult::reject(
                format!(
                    "Position count {} at maximum {}",
                    position_count, s.max_positions
                ),
                Severity::Warning,
                details([
                    ("position_count", json!(position_count)),
                    ("max_positions", json!(s.max_positions)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Portfolio, result);
        }

        debug!(
            drawdown = %drawdown,
            cash_ratio = %cash_ratio,
            positions = position_count,
            "portfolio risk approved"
        );
        RiskCheckResult::approve(
            "Portfolio risk within limits",
            details([
                ("drawdown", json!(drawdown)),
                ("cash_ratio", json!(cash_ratio)),
                ("position_count", json!(position_count)),
                ("portfolio_value", json!(portfolio_value)),
            ]),
        )
    }

    // ==================== Position ====================

    /// Size ceiling and position-level stop loss for one holding
    pub async fn check_position_risk(
        &self,
        position_value: Decimal,
        portfolio_value: Decimal,
        entry_price: Decimal,
        current_price: Decimal,
    ) -> RiskCheckResult {
        let mut state = self.state.lock().await;
        let s = &self.settings;

        if portfolio_value <= Decimal::ZERO {
            let result = RiskCheckResult::reject(
                format!("Portfolio value {} is not positive", portfolio_value),
                Severity::Error,
                details([("portfolio_value", json!(portfolio_value))]),
            );
            return self.rejected(&mut state, RiskCheckKind::Position, result);
        }

        let size_ratio = position_value.abs() / portfolio_value;
        if size_ratio > s.max_position_size {
            let result = RiskCheckResult::reject(
                format!(
                    "Position size {:.4} exceeds maximum {}",
                    size_ratio, s.max_position_size
                ),
                Severity::Warning,
                details([
                    ("size_ratio", json!(size_ratio)),
                    ("max_position_size", json!(s.max_position_size)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Position, result);
        }

        let pnl_pct = if entry_price > Decimal::ZERO {
            (current_price - entry_price) / entry_price
        } else {
            Decimal::ZERO
        };
        if pnl_pct < -s.stop_loss_pct {
            let result = RiskCheckResult::reject(
                format!(
                    "Stop loss hit: {:.4} below -{}",
                    pnl_pct, s.stop_loss_pct
                ),
                Severity::Warning,
                details([
                    ("pnl_pct", json!(pnl_pct)),
                    ("stop_loss_pct", json!(s.stop_loss_pct)),
                    ("entry_price", json!(entry_price)),
                    ("current_price", json!(current_price)),
                ]),
            );
            return self.rejected(&mut state, RiskCheckKind::Position, result);
        }

        RiskCheckResult::approve(
            "Position risk within limits",
            details([("size_ratio", json!(size_ratio)), ("pnl_pct", json!(pnl_pct))]),
        )
    }

    // ==================== Sizing ====================

    /// Dollar allocation for a signal of `signal_strength` in [0, 1].
    ///
    /// base = strength × max_position_size × portfolio_value, scaled by
    /// target_vol / vol (clamped to [0.1, 2.0]) when volatility targeting applies, and
    /// never above the max-position ceiling.
    pub fn calculate_position_size(
        &self,
        signal_strength: Decimal,
        portfolio_value: Decimal,
        volatility: Option<Decimal>,
    ) -> Decimal {
        let s = &self.settings;
        if portfolio_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let strength = signal_strength.clamp(Decimal::ZERO, Decimal::ONE);
        let ceiling = s.max_position_size * portfolio_value;
        let base = strength * ceiling;

        let sized = match volatility {
            Some(vol) if s.volatility_targeting && vol > Decimal::ZERO => {
                let scale = (s.target_volatility / vol).clamp(MIN_VOL_SCALE, MAX_VOL_SCALE);
                base * scale
            }
            _ => base,
        };
        sized.min(ceiling)
    }

    // ==================== Correlation ====================

    /// Reject `new_symbol` when too many existing holdings move with it.
    ///
    /// Correlation is Pearson over period returns of the supplied price series. Holdings
    /// without a series (or with too little overlap) never count as correlated.
    pub async fn check_correlation(
        &self,
        new_symbol: &str,
        existing_positions: &HashMap<String, Position>,
        price_series: &HashMap<String, Vec<Decimal>>,
    ) -> RiskCheckResult {
        let s = &self.settings;
        let threshold = s.correlation_threshold.to_f64().unwrap_or(1.0);

        let Some(new_returns) = price_series.get(new_symbol).map(|p| pct_changes(&to_f64(p)))
        else {
            return RiskCheckResult::approve(
                format!("No price history for {}", new_symbol),
                RiskDetails::new(),
            );
        };

        let mut correlated = Vec::new();
        let mut correlations = serde_json::Map::new();
        let mut held: Vec<&String> = existing_positions
            .iter()
            .filter(|(symbol, p)| !p.is_flat() && symbol.as_str() != new_symbol)
            .map(|(symbol, _)| symbol)
            .collect();
        held.sort();

        for symbol in held {
            let Some(series) = price_series.get(symbol) else {
                continue;
            };
            let Some(corr) = pearson(&new_returns, &pct_changes(&to_f64(series))) else {
                continue;
            };
            correlations.insert(
                symbol.clone(),
                json!(Decimal::from_f64(corr).unwrap_or_default().round_dp(4)),
            );
            if corr.abs() > threshold {
                correlated.push(symbol.clone());
            }
        }

        let info = details([
            ("symbol", json!(new_symbol)),
            ("correlated_with", json!(correlated)),
            ("correlations", serde_json::Value::Object(correlations)),
            ("correlation_threshold", json!(s.correlation_threshold)),
            ("max_correlated_positions", json!(s.max_correlated_positions)),
        ]);

        if correlated.len() >= s.max_correlated_positions {
            let result = RiskCheckResult::reject(
                format!(
                    "{} is correlated with {} holdings (max {})",
                    new_symbol,
                    correlated.len(),
                    s.max_correlated_positions
                ),
                Severity::Warning,
                info,
            );
            let mut state = self.state.lock().await;
            return self.rejected(&mut state, RiskCheckKind::Correlation, result);
        }

        RiskCheckResult::approve("Correlation within limits", info)
    }

    // ==================== Circuit breaker ====================

    /// The only way out of `Tripped`
    pub async fn reset_circuit_breaker(&self) {
        let mut state = self.state.lock().await;
        if state.breaker == BreakerState::Normal {
            return;
        }
        info!("Circuit breaker reset");
        state.breaker = BreakerState::Normal;
        state.push_circuit_event("reset".to_string(), BreakerState::Normal);
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.state.lock().await.breaker
    }

    pub async fn is_tripped(&self) -> bool {
        self.breaker_state().await == BreakerState::Tripped
    }

    /// Snapshot of the breach log
    pub async fn breaches(&self) -> Vec<RiskBreach> {
        self.state.lock().await.breaches.clone()
    }

    pub async fn circuit_breaker_events(&self) -> Vec<CircuitBreakerEvent> {
        self.state.lock().await.circuit_events.clone()
    }

    fn rejected(
        &self,
        state: &mut RiskState,
        check: RiskCheckKind,
        result: RiskCheckResult,
    ) -> RiskCheckResult {
        warn!(check = %check, severity = %result.severity, "risk check rejected: {}", result.reason);
        let breach = state.record(check, &result);
        self.audit.record(AuditEvent::RiskBreach { breach });
        result
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskSettings::default())
    }
}

fn details<const N: usize>(entries: [(&str, serde_json::Value); N]) -> RiskDetails {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
