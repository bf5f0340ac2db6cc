use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the simulation and risk-gating core
#[derive(Error, Debug)]
pub enum GateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Construction errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // Order lifecycle errors
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // Strategy errors
    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Strategy registration rejected: {0}")]
    InvalidStrategy(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GateError
pub type Result<T> = std::result::Result<T, GateError>;

/// Malformed value-type construction. Never coerced, always surfaced at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid fill: {0}")]
    InvalidFill(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}

/// Specific error types for the order lifecycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Invalid state transition for {order_id}: from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    #[error("Overfill on {order_id}: remaining {remaining}, fill {requested}")]
    Overfill {
        order_id: String,
        remaining: Decimal,
        requested: Decimal,
    },

    #[error("Max retries exceeded for {order_id}: {attempts}")]
    MaxRetriesExceeded { order_id: String, attempts: u32 },
}

/// Transport failure reported by an execution gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Gateway error [{code}]: {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
