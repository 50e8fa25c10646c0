use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Sign applied to PnL math: +1 for long, -1 for short.
    pub fn direction(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => -Decimal::ONE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// What an order is trying to do to the position book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderIntent {
    Entry,
    ReduceOnlyExit,
    StopLoss,
}

impl OrderIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderIntent::Entry => "ENTRY",
            OrderIntent::ReduceOnlyExit => "REDUCE_ONLY_EXIT",
            OrderIntent::StopLoss => "STOP_LOSS",
        }
    }
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY" => Ok(OrderIntent::Entry),
            "REDUCE_ONLY_EXIT" => Ok(OrderIntent::ReduceOnlyExit),
            "STOP_LOSS" => Ok(OrderIntent::StopLoss),
            other => Err(format!("unknown order intent: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Why a position was closed. Appended to the immutable trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    ManualExit,
    StopLoss,
    ReconciledClose,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::ManualExit => "MANUAL_EXIT",
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::ReconciledClose => "RECONCILED_CLOSE",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL_EXIT" => Ok(CloseReason::ManualExit),
            "STOP_LOSS" => Ok(CloseReason::StopLoss),
            "RECONCILED_CLOSE" => Ok(CloseReason::ReconciledClose),
            other => Err(format!("unknown close reason: {other}")),
        }
    }
}

/// Point-in-time view of the market a signal was generated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub as_of: DateTime<Utc>,
    pub source_latency_ms: i64,
}

impl MarketSnapshot {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Quoted spread in basis points. `None` when the book is unusable
    /// (bid <= 0 or crossed).
    pub fn spread_bps(&self) -> Option<Decimal> {
        if self.bid <= Decimal::ZERO || self.ask < self.bid {
            return None;
        }
        let mid = self.mid();
        (self.ask - self.bid)
            .checked_div(mid)
            .map(|r| r * Decimal::from(10_000))
    }
}

/// A market data update for one symbol.
#[derive(Debug, Clone)]
pub struct MarketTick {
    pub symbol: String,
    pub snapshot: MarketSnapshot,
}

/// Externally produced trading intent, in-flight only.
#[derive(Debug, Clone)]
pub struct Signal {
    pub va_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub desired_qty: Decimal,
    /// Price the strategy expected to trade at. Not always populated;
    /// the slippage gate is skipped when absent.
    pub expected_price: Option<Decimal>,
    pub snapshot: MarketSnapshot,
    pub received_at: DateTime<Utc>,
}

/// Execution report from the exchange for one order.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub qty_increment: Decimal,
    pub price: Decimal,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_roundtrip_and_direction() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.direction(), dec!(1));
        assert_eq!(OrderSide::Sell.direction(), dec!(-1));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn test_spread_bps() {
        let snapshot = MarketSnapshot {
            bid: dec!(100.00),
            ask: dec!(100.20),
            last: dec!(100.10),
            as_of: Utc::now(),
            source_latency_ms: 0,
        };
        // (0.20 / 100.10) * 10_000 ~= 19.98 bps
        let bps = snapshot.spread_bps().unwrap();
        assert!(bps > dec!(19.9) && bps < dec!(20.1));
    }

    #[test]
    fn test_spread_bps_invalid_book() {
        let crossed = MarketSnapshot {
            bid: dec!(100.10),
            ask: dec!(100.00),
            last: dec!(100.05),
            as_of: Utc::now(),
            source_latency_ms: 0,
        };
        assert!(crossed.spread_bps().is_none());

        let zero_bid = MarketSnapshot {
            bid: dec!(0),
            ask: dec!(1),
            last: dec!(0.5),
            as_of: Utc::now(),
            source_latency_ms: 0,
        };
        assert!(zero_bid.spread_bps().is_none());
    }
}
