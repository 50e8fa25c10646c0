use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the order manager. Everything here is reported to the
/// execution loop, which decides whether to continue or escalate.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Exchange rejected order {order_id}: {reason}")]
    ExchangeRejected { order_id: String, reason: String },

    #[error("Stop-loss attach failed for entry {entry_id}: {reason}")]
    StopLossAttachFailed { entry_id: String, reason: String },

    #[error(
        "Inconsistent fill for order {order_id}: {filled} + {increment} exceeds requested {requested}"
    )]
    InconsistentFill {
        order_id: String,
        filled: Decimal,
        increment: Decimal,
        requested: Decimal,
    },

    #[error("Reconciliation timed out after {ticks} consecutive failed ticks: {reason}")]
    ReconciliationTimeout { ticks: u32, reason: String },

    #[error("No open position for {va_id}/{symbol}")]
    PositionNotFound { va_id: String, symbol: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Faults reported by the exchange adapter.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Exchange call timed out after {0} ms")]
    Timeout(u64),

    #[error("Exchange unavailable: {0}")]
    Unavailable(String),
}

impl ExchangeError {
    /// Transient faults are retried by reconciliation; they never mutate
    /// local state.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Timeout(_) | ExchangeError::Unavailable(_))
    }
}
