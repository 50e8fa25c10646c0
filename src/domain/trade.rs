use crate::domain::position::Position;
use crate::domain::types::{CloseReason, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record appended when a position closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub va_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
}

impl Trade {
    pub fn from_close(
        position: &Position,
        qty: Decimal,
        exit_price: Decimal,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: Uuid::new_v4().to_string(),
            va_id: position.va_id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            qty,
            entry_price: position.avg_entry_price,
            exit_price,
            realized_pnl: position.realized_on(exit_price, qty),
            closed_at,
            reason,
        }
    }
}
