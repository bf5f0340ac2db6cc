use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells. Used to sign quantities.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Unvalidated wire shape of an [`Order`]; deserialization goes through [`Order::new`].
#[derive(Debug, Clone, Deserialize)]
struct RawOrder {
    symbol: String,
    quantity: Decimal,
    order_type: OrderType,
    side: OrderSide,
    #[serde(default)]
    limit_price: Option<Decimal>,
}

impl TryFrom<RawOrder> for Order {
    type Error = ValidationError;

    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        Order::new(raw.symbol, raw.quantity, raw.order_type, raw.side, raw.limit_price)
    }
}

/// An instruction to trade. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOrder")]
pub struct Order {
    symbol: String,
    quantity: Decimal,
    order_type: OrderType,
    side: OrderSide,
    limit_price: Option<Decimal>,
}

impl Order {
    /// Validate and build an order.
    ///
    /// A limit price is required (and must be positive) for limit orders and forbidden
    /// for market orders.
    pub fn new(
        symbol: impl Into<String>,
        quantity: Decimal,
        order_type: OrderType,
        side: OrderSide,
        limit_price: Option<Decimal>,
    ) -> Result<Self, ValidationError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(ValidationError::InvalidOrder("symbol must not be empty".into()));
        }
        if quantity <= Decimal::ZERO {
            return Err(ValidationError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        match (order_type, limit_price) {
            (OrderType::Limit, None) => {
                return Err(ValidationError::InvalidOrder(
                    "limit order requires a limit price".into(),
                ))
            }
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
                return Err(ValidationError::InvalidOrder(format!(
                    "limit price must be positive, got {}",
                    price
                )))
            }
            (OrderType::Market, Some(_)) => {
                return Err(ValidationError::InvalidOrder(
                    "market order must not carry a limit price".into(),
                ))
            }
            _ => {}
        }

        Ok(Self {
            symbol,
            quantity,
            order_type,
            side,
            limit_price,
        })
    }

    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Self, ValidationError> {
        Self::new(symbol, quantity, OrderType::Market, side, None)
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Result<Self, ValidationError> {
        Self::new(symbol, quantity, OrderType::Limit, side, Some(limit_price))
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        self.limit_price
    }

    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawFill {
    order: Order,
    fill_price: Decimal,
    fill_quantity: Decimal,
    commission: Decimal,
    timestamp: DateTime<Utc>,
    fill_id: String,
}

impl TryFrom<RawFill> for Fill {
    type Error = ValidationError;

    fn try_from(raw: RawFill) -> Result<Self, Self::Error> {
        Fill::new(
            raw.order,
            raw.fill_price,
            raw.fill_quantity,
            raw.commission,
            raw.timestamp,
            raw.fill_id,
        )
    }
}

/// An executed (possibly partial) trade against an [`Order`]. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFill")]
pub struct Fill {
    order: Order,
    fill_price: Decimal,
    fill_quantity: Decimal,
    commission: Decimal,
    timestamp: DateTime<Utc>,
    fill_id: String,
}

impl Fill {
    pub fn new(
        order: Order,
        fill_price: Decimal,
        fill_quantity: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
        fill_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if fill_price <= Decimal::ZERO {
            return Err(ValidationError::InvalidFill(format!(
                "fill price must be positive, got {}",
                fill_price
            )));
        }
        if fill_quantity <= Decimal::ZERO {
            return Err(ValidationError::InvalidFill(format!(
                "fill quantity must be positive, got {}",
                fill_quantity
            )));
        }
        if commission < Decimal::ZERO {
            return Err(ValidationError::InvalidFill(format!(
                "commission must be non-negative, got {}",
                commission
            )));
        }

        Ok(Self {
            order,
            fill_price,
            fill_quantity,
            commission,
            timestamp,
            fill_id: fill_id.into(),
        })
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn symbol(&self) -> &str {
        self.order.symbol()
    }

    pub fn side(&self) -> OrderSide {
        self.order.side()
    }

    pub fn fill_price(&self) -> Decimal {
        self.fill_price
    }

    pub fn fill_quantity(&self) -> Decimal {
        self.fill_quantity
    }

    pub fn commission(&self) -> Decimal {
        self.commission
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fill_id(&self) -> &str {
        &self.fill_id
    }

    /// price × quantity
    pub fn notional(&self) -> Decimal {
        self.fill_price * self.fill_quantity
    }

    /// Buys cost notional + commission, sells realize notional - commission.
    pub fn total_cost(&self) -> Decimal {
        match self.side() {
            OrderSide::Buy => self.notional() + self.commission,
            OrderSide::Sell => self.notional() - self.commission,
        }
    }

    /// Cash delta of this fill: negative for buys, positive for sells.
    pub fn net_proceeds(&self) -> Decimal {
        match self.side() {
            OrderSide::Buy => -(self.notional() + self.commission),
            OrderSide::Sell => self.notional() - self.commission,
        }
    }

    /// Quantity signed by side (+ for buys, - for sells)
    pub fn signed_quantity(&self) -> Decimal {
        self.side().sign() * self.fill_quantity
    }
}
