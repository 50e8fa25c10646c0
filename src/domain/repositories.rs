use crate::domain::account::VirtualAccount;
use crate::domain::order::Order;
use crate::domain::position::Position;
use crate::domain::trade::Trade;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Transactional store behind every state change that matters for the
/// engine's invariants. Mutations that span entities (fill application,
/// position close) happen inside one transaction so a crash between steps
/// leaves the system valid. In-memory caches are write-through: callers
/// commit here first, then update their caches.
#[async_trait]
pub trait TradeStore: Send + Sync {
    // --- virtual accounts ---
    async fn load_accounts(&self) -> Result<Vec<VirtualAccount>>;
    async fn save_account(&self, account: &VirtualAccount) -> Result<()>;

    // --- orders ---
    async fn insert_order(&self, order: &Order) -> Result<()>;
    async fn update_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>>;
    async fn open_orders(&self) -> Result<Vec<Order>>;
    /// Non-terminal orders whose last update is older than `cutoff`.
    async fn stale_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
    /// Live (non-terminal) stop-loss order protecting `(va_id, symbol)`.
    async fn live_stop_for_position(&self, va_id: &str, symbol: &str) -> Result<Option<Order>>;

    // --- positions ---
    async fn open_positions(&self) -> Result<Vec<Position>>;
    async fn get_position(&self, va_id: &str, symbol: &str) -> Result<Option<Position>>;
    /// VA currently owning `symbol`, if any. Backed by the unique index
    /// that enforces one owner per symbol.
    async fn symbol_owner(&self, symbol: &str) -> Result<Option<String>>;
    async fn update_position_price(&self, va_id: &str, symbol: &str, price: Decimal) -> Result<()>;

    // --- transactional multi-entity mutations ---
    /// Entry fill: order row and position upsert commit together.
    async fn apply_entry_fill(&self, order: &Order, position: &Position) -> Result<()>;
    /// Exit fill leaving the position open: order row and reduced position
    /// commit together.
    async fn apply_exit_fill(&self, order: &Order, position: &Position) -> Result<()>;
    /// Final exit fill: order row, position delete, trade append, and the
    /// settled account commit together.
    async fn close_position(
        &self,
        order: &Order,
        trade: &Trade,
        account: &VirtualAccount,
    ) -> Result<()>;

    // --- trades ---
    async fn trades_for_account(&self, va_id: &str) -> Result<Vec<Trade>>;

    // --- incidents ---
    async fn record_incident(&self, kind: &str, detail: &str, ts: DateTime<Utc>) -> Result<()>;
    async fn incident_count(&self) -> Result<u64>;

    /// Release underlying resources. Called last on shutdown.
    async fn close(&self);
}
