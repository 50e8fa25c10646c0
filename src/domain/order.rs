use crate::domain::errors::OrderError;
use crate::domain::types::{FillEvent, OrderIntent, OrderSide, OrderStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One exchange order through its lifecycle. Status moves monotonically
/// except Partial -> Partial; terminal states are Filled, Canceled,
/// Rejected, Expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub va_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub intent: OrderIntent,
    pub qty_requested: Decimal,
    pub qty_filled: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    /// Required for entries; the protective price the linked stop carries.
    pub stop_loss_price: Option<Decimal>,
    /// Set on stop-loss orders and synthesized protective closes.
    pub linked_entry_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl Order {
    pub fn entry(
        va_id: &str,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_loss_price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            va_id: va_id.to_string(),
            symbol: symbol.to_string(),
            side,
            intent: OrderIntent::Entry,
            qty_requested: qty,
            qty_filled: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            stop_loss_price: Some(stop_loss_price),
            linked_entry_id: None,
            created_at: now,
            last_update_at: now,
        }
    }

    /// Protective stop linked to an entry. Opposite side, quantity kept in
    /// sync with the entry's cumulative fill.
    pub fn stop_loss(entry: &Order, qty: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            va_id: entry.va_id.clone(),
            symbol: entry.symbol.clone(),
            side: entry.side.opposite(),
            intent: OrderIntent::StopLoss,
            qty_requested: qty,
            qty_filled: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            stop_loss_price: entry.stop_loss_price,
            linked_entry_id: Some(entry.order_id.clone()),
            created_at: now,
            last_update_at: now,
        }
    }

    /// Market close that can only shrink a position, never flip it.
    /// `linked_entry_id` is set when the close protects a position that
    /// lost (or triggered) its stop.
    pub fn reduce_only(
        va_id: &str,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        linked_entry_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            va_id: va_id.to_string(),
            symbol: symbol.to_string(),
            side,
            intent: OrderIntent::ReduceOnlyExit,
            qty_requested: qty,
            qty_filled: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            stop_loss_price: None,
            linked_entry_id,
            created_at: now,
            last_update_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_qty(&self) -> Decimal {
        self.qty_requested - self.qty_filled
    }

    /// Apply one fill increment: cumulative quantity, quantity-weighted
    /// average price, and the Pending/Partial/Filled transition. Overfills
    /// are refused, never auto-corrected.
    pub fn apply_fill(&mut self, fill: &FillEvent) -> Result<(), OrderError> {
        let new_filled = self.qty_filled + fill.qty_increment;
        if new_filled > self.qty_requested {
            return Err(OrderError::InconsistentFill {
                order_id: self.order_id.clone(),
                filled: self.qty_filled,
                increment: fill.qty_increment,
                requested: self.qty_requested,
            });
        }

        let prior_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.qty_filled;
        let notional = prior_notional + fill.price * fill.qty_increment;
        self.avg_fill_price = notional.checked_div(new_filled);
        self.qty_filled = new_filled;
        self.status = if self.qty_filled == self.qty_requested {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.last_update_at = fill.ts;
        Ok(())
    }
}
