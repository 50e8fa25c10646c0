use crate::domain::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position, keyed by `(va_id, symbol)`. At most one VA may hold
/// a position for any symbol globally; the store's uniqueness constraint
/// on symbol is load-bearing for that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub va_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        va_id: &str,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        stop_loss_price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            va_id: va_id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            avg_entry_price: price,
            current_price: price,
            stop_loss_price,
            opened_at: now,
        }
    }

    /// Fold an additional entry fill in, recomputing the quantity-weighted
    /// average entry price.
    pub fn apply_entry_fill(&mut self, qty: Decimal, price: Decimal) {
        let new_qty = self.qty + qty;
        if new_qty > Decimal::ZERO {
            let notional = self.avg_entry_price * self.qty + price * qty;
            self.avg_entry_price = notional.checked_div(new_qty).unwrap_or(self.avg_entry_price);
        }
        self.qty = new_qty;
        self.current_price = price;
    }

    pub fn reduce(&mut self, qty: Decimal) {
        self.qty = (self.qty - qty).max(Decimal::ZERO);
    }

    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
    }

    /// PnL realized by closing `qty` at `exit_price`:
    /// `(exit - entry) * qty * sign(side)`.
    pub fn realized_on(&self, exit_price: Decimal, qty: Decimal) -> Decimal {
        (exit_price - self.avg_entry_price) * qty * self.side.direction()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.realized_on(self.current_price, self.qty)
    }

    /// Buy positions trigger at or below the stop, sell positions at or
    /// above it.
    pub fn stop_triggered(&self, price: Decimal) -> bool {
        match self.side {
            OrderSide::Buy => price <= self.stop_loss_price,
            OrderSide::Sell => price >= self.stop_loss_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position::open("VA001", "AAPL", OrderSide::Buy, dec!(4), dec!(100), dec!(98), Utc::now())
    }

    #[test]
    fn test_weighted_average_entry() {
        let mut pos = long_position();
        pos.apply_entry_fill(dec!(6), dec!(101));

        assert_eq!(pos.qty, dec!(10));
        assert_eq!(pos.avg_entry_price, dec!(100.6));
    }

    #[test]
    fn test_realized_pnl_sign() {
        let long = long_position();
        assert_eq!(long.realized_on(dec!(97.95), dec!(4)), dec!(-8.20));

        let short =
            Position::open("VA002", "TSLA", OrderSide::Sell, dec!(2), dec!(200), dec!(204), Utc::now());
        assert_eq!(short.realized_on(dec!(190), dec!(2)), dec!(20));
    }

    #[test]
    fn test_unrealized_follows_mark() {
        let mut pos = long_position();
        pos.mark(dec!(103));
        assert_eq!(pos.unrealized_pnl(), dec!(12));
    }

    #[test]
    fn test_stop_trigger_both_sides() {
        let long = long_position();
        assert!(!long.stop_triggered(dec!(98.01)));
        assert!(long.stop_triggered(dec!(98)));
        assert!(long.stop_triggered(dec!(97.95)));

        let short =
            Position::open("VA002", "TSLA", OrderSide::Sell, dec!(2), dec!(200), dec!(204), Utc::now());
        assert!(!short.stop_triggered(dec!(203.99)));
        assert!(short.stop_triggered(dec!(204)));
        assert!(short.stop_triggered(dec!(210)));
    }
}
