use crate::domain::errors::ExchangeError;
use crate::domain::types::{FillEvent, MarketTick, OrderIntent, OrderSide, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;

/// What the engine hands the exchange when submitting. `order_id` is the
/// client id; fills and queries reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub intent: OrderIntent,
    pub qty: Decimal,
    pub stop_price: Option<Decimal>,
}

/// Exchange's answer to a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    Canceled,
    Unknown,
}

/// The exchange's view of one order; authoritative on disagreement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrderView {
    pub status: OrderStatus,
    pub qty_filled: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

/// The single real exchange connection shared by every virtual account.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn submit_order(&self, spec: &OrderSpec) -> Result<(), ExchangeError>;

    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck, ExchangeError>;

    async fn query_order(&self, order_id: &str) -> Result<ExchangeOrderView, ExchangeError>;

    /// Push stream of execution reports. May be taken once per session.
    async fn fill_stream(&self) -> Result<Receiver<FillEvent>, ExchangeError>;

    /// Push stream of market snapshots. May be taken once per session.
    async fn market_stream(&self) -> Result<Receiver<MarketTick>, ExchangeError>;
}
