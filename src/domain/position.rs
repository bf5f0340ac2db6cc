use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::order::Fill;
use crate::error::ValidationError;

/// Net holding in a single symbol.
///
/// `quantity` is signed: positive long, negative short, zero flat. `avg_entry_price` is only
/// meaningful while the position is open and is reset to zero when it flattens.
/// Mutated only through [`Position::update_from_fill`] and [`Position::update_unrealized_pnl`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    quantity: Decimal,
    avg_entry_price: Decimal,
    unrealized_pnl: Decimal,
    realized_pnl: Decimal,
}

impl Position {
    /// A flat position in `symbol`
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn avg_entry_price(&self) -> Decimal {
        self.avg_entry_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// avg_entry_price × |quantity|
    pub fn cost_basis(&self) -> Decimal {
        self.avg_entry_price * self.quantity.abs()
    }

    /// cost_basis + unrealized_pnl
    pub fn market_value(&self) -> Decimal {
        self.cost_basis() + self.unrealized_pnl
    }

    /// Signed exposure at `price` (negative for shorts)
    pub fn notional_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Apply a fill to this position.
    ///
    /// Same-direction fills average the entry price. Opposite fills realize P&L on the reduced
    /// quantity only; a fill larger than the open quantity closes it and opens the other side
    /// at the fill price. The fill's commission is always charged against realized P&L.
    /// When `current_price` is supplied the unrealized P&L is recomputed afterwards.
    /// A fill for another symbol is rejected and leaves the position untouched.
    pub fn update_from_fill(
        &mut self,
        fill: &Fill,
        current_price: Option<Decimal>,
    ) -> Result<(), ValidationError> {
        if fill.symbol() != self.symbol {
            return Err(ValidationError::InvalidFill(format!(
                "fill {} is for {}, position is {}",
                fill.fill_id(),
                fill.symbol(),
                self.symbol
            )));
        }
        let fill_qty = fill.signed_quantity();
        let price = fill.fill_price();
        let previous = self.quantity;

        if previous.is_zero() {
            // Opening from flat
            self.quantity = fill_qty;
            self.avg_entry_price = price;
        } else if previous.is_sign_positive() == fill_qty.is_sign_positive() {
            // Increasing in the same direction
            let new_qty = previous + fill_qty;
            self.avg_entry_price =
                (self.avg_entry_price * previous.abs() + price * fill_qty.abs()) / new_qty.abs();
            self.quantity = new_qty;
        } else if fill_qty.abs() <= previous.abs() {
            // Reducing without crossing zero
            let closed = fill_qty.abs();
            self.realized_pnl += self.pnl_on_close(price, closed);
            self.quantity = previous + fill_qty;
            if self.quantity.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
                self.unrealized_pnl = Decimal::ZERO;
            }
        } else {
            // Reducing through zero: close the prior quantity, open the remainder
            let closed = previous.abs();
            self.realized_pnl += self.pnl_on_close(price, closed);
            self.quantity = previous + fill_qty;
            self.avg_entry_price = price;
        }

        self.realized_pnl -= fill.commission();

        debug!(
            symbol = %self.symbol,
            previous = %previous,
            quantity = %self.quantity,
            avg_entry = %self.avg_entry_price,
            realized = %self.realized_pnl,
            "position updated from fill {}",
            fill.fill_id()
        );

        match current_price {
            Some(price) => self.update_unrealized_pnl(price),
            None if self.quantity.is_zero() => self.unrealized_pnl = Decimal::ZERO,
            None => {}
        }
        Ok(())
    }

    /// Mark the open quantity to `current_price`.
    pub fn update_unrealized_pnl(&mut self, current_price: Decimal) {
        self.unrealized_pnl = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            (current_price - self.avg_entry_price) * self.quantity
        };
    }

    fn pnl_on_close(&self, exit_price: Decimal, closed: Decimal) -> Decimal {
        if self.quantity > Decimal::ZERO {
            (exit_price - self.avg_entry_price) * closed
        } else {
            (self.avg_entry_price - exit_price) * closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Order, OrderSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, qty: Decimal, price: Decimal, commission: Decimal) -> Fill {
        let order = Order::market("AAPL", side, qty).unwrap();
        Fill::new(order, price, qty, commission, Utc::now(), "f").unwrap()
    }

    #[test]
    fn test_open_from_flat() {
        let mut pos = Position::new("AAPL");
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(0)), None).unwrap();
        assert_eq!(pos.quantity(), dec!(10));
        assert_eq!(pos.avg_entry_price(), dec!(100));
        assert_eq!(pos.cost_basis(), dec!(1000));
    }

    #[test]
    fn test_increase_averages_entry() {
        let mut pos = Position::new("AAPL");
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(0)), None).unwrap();
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(110), dec!(0)), None).unwrap();
        assert_eq!(pos.quantity(), dec!(20));
        assert_eq!(pos.avg_entry_price(), dec!(105));
    }

    #[test]
    fn test_partial_reduce_keeps_entry() {
        let mut pos = Position::new("AAPL");
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(0)), None).unwrap();
        pos.update_from_fill(&fill(OrderSide::Sell, dec!(4), dec!(110), dec!(0)), Some(dec!(110))).unwrap();
        assert_eq!(pos.quantity(), dec!(6));
        assert_eq!(pos.avg_entry_price(), dec!(100));
        assert_eq!(pos.realized_pnl(), dec!(40));
        assert_eq!(pos.unrealized_pnl(), dec!(60));
        assert_eq!(pos.market_value(), dec!(660));
    }

    #[test]
    fn test_reduce_through_zero_flips_side() {
        let mut pos = Position::new("AAPL");
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(0)), None).unwrap();
        pos.update_from_fill(&fill(OrderSide::Sell, dec!(15), dec!(90), dec!(0)), None).unwrap();
        assert_eq!(pos.quantity(), dec!(-5));
        assert_eq!(pos.avg_entry_price(), dec!(90));
        assert_eq!(pos.realized_pnl(), dec!(-100));
        assert!(pos.is_short());
    }

    #[test]
    fn test_short_round_trip() {
        let mut pos = Position::new("AAPL");
        pos.update_from_fill(&fill(OrderSide::Sell, dec!(5), dec!(50), dec!(0)), None).unwrap();
        pos.update_unrealized_pnl(dec!(45));
        assert_eq!(pos.unrealized_pnl(), dec!(25));
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(5), dec!(45), dec!(0)), None).unwrap();
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl(), dec!(25));
        assert_eq!(pos.unrealized_pnl(), dec!(0));
    }

    #[test]
    fn test_full_round_trips_accumulate_net_of_commission() {
        let mut pos = Position::new("AAPL");
        // (110 - 100) * 10 - 1 - 1 = 98
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(1)), None).unwrap();
        pos.update_from_fill(&fill(OrderSide::Sell, dec!(10), dec!(110), dec!(1)), None).unwrap();
        // (95 - 100) * 2 - 0.5 - 0.5 = -11
        pos.update_from_fill(&fill(OrderSide::Buy, dec!(2), dec!(100), dec!(0.5)), None).unwrap();
        pos.update_from_fill(&fill(OrderSide::Sell, dec!(2), dec!(95), dec!(0.5)), None).unwrap();

        assert_eq!(pos.quantity(), dec!(0));
        assert_eq!(pos.avg_entry_price(), dec!(0));
        assert_eq!(pos.realized_pnl(), dec!(87));
    }

    #[test]
    fn test_fill_for_another_symbol_is_rejected() {
        let mut pos = Position::new("MSFT");
        let err = pos
            .update_from_fill(&fill(OrderSide::Buy, dec!(10), dec!(100), dec!(1)), None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFill(_)));
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl(), Decimal::ZERO);
    }
}
