use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::supervisor::Severity;

/// Structured context attached to every risk decision (thresholds, actual values)
pub type RiskDetails = BTreeMap<String, serde_json::Value>;

/// Outcome of a single risk check. Produced fresh by every check and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub approved: bool,
    pub reason: String,
    pub details: RiskDetails,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl RiskCheckResult {
    pub fn approve(reason: impl Into<String>, details: RiskDetails) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            details,
            severity: Severity::Info,
            timestamp: Utc::now(),
        }
    }

    pub fn reject(reason: impl Into<String>, severity: Severity, details: RiskDetails) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            details,
            severity,
            timestamp: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn is_rejected(&self) -> bool {
        !self.approved
    }

    /// Rejections raised because the circuit breaker tripped or is already active
    pub fn is_critical(&self) -> bool {
        !self.approved && self.severity == Severity::Critical
    }
}

impl std::fmt::Display for RiskCheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.approved {
            write!(f, "approved: {}", self.reason)
        } else {
            write!(f, "rejected [{}]: {}", self.severity, self.reason)
        }
    }
}

/// Which check produced a breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCheckKind {
    Portfolio,
    Position,
    Correlation,
}

impl std::fmt::Display for RiskCheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskCheckKind::Portfolio => write!(f, "portfolio"),
            RiskCheckKind::Position => write!(f, "position"),
            RiskCheckKind::Correlation => write!(f, "correlation"),
        }
    }
}

/// Entry in the append-only breach log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreach {
    pub timestamp: DateTime<Utc>,
    pub check: RiskCheckKind,
    pub reason: String,
    pub severity: Severity,
    pub details: RiskDetails,
}

impl RiskBreach {
    pub fn from_result(check: RiskCheckKind, result: &RiskCheckResult) -> Self {
        Self {
            timestamp: result.timestamp,
            check,
            reason: result.reason.clone(),
            severity: result.severity,
            details: result.details.clone(),
        }
    }
}
