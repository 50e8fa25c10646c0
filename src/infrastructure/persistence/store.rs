use crate::domain::account::VirtualAccount;
use crate::domain::order::Order;
use crate::domain::position::Position;
use crate::domain::repositories::TradeStore;
use crate::domain::trade::Trade;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// `TradeStore` over SQLite. Decimals are stored as TEXT and parsed back
/// strictly; a corrupt column is an error, never a silent zero.
pub struct SqliteStore {
    db: Database,
}

type OrderRow = (
    String,         // order_id
    String,         // va_id
    String,         // symbol
    String,         // side
    String,         // intent
    String,         // qty_requested
    String,         // qty_filled
    Option<String>, // avg_fill_price
    String,         // status
    Option<String>, // stop_loss_price
    Option<String>, // linked_entry_id
    i64,            // created_at
    i64,            // last_update_at
);

type PositionRow = (String, String, String, String, String, String, String, i64);

type AccountRow = (
    String,      // va_id
    String,      // balance
    String,      // realized_pnl
    i64,         // wins
    i64,         // losses
    i64,         // consecutive_losses
    String,      // peak_equity
    String,      // max_drawdown
    Option<i64>, // cooldown_until
    bool,        // kill_switch
);

type TradeRow = (String, String, String, String, String, String, String, String, i64, String);

fn decimal(column: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Corrupt decimal in {column}: {raw}"))
}

fn datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn order_from_row(row: OrderRow) -> Result<Order> {
    Ok(Order {
        order_id: row.0,
        va_id: row.1,
        symbol: row.2,
        side: row.3.parse().map_err(anyhow::Error::msg)?,
        intent: row.4.parse().map_err(anyhow::Error::msg)?,
        qty_requested: decimal("qty_requested", &row.5)?,
        qty_filled: decimal("qty_filled", &row.6)?,
        avg_fill_price: row.7.as_deref().map(|s| decimal("avg_fill_price", s)).transpose()?,
        status: row.8.parse().map_err(anyhow::Error::msg)?,
        stop_loss_price: row
            .9
            .as_deref()
            .map(|s| decimal("stop_loss_price", s))
            .transpose()?,
        linked_entry_id: row.10,
        created_at: datetime(row.11),
        last_update_at: datetime(row.12),
    })
}

fn position_from_row(row: PositionRow) -> Result<Position> {
    Ok(Position {
        va_id: row.0,
        symbol: row.1,
        side: row.2.parse().map_err(anyhow::Error::msg)?,
        qty: decimal("qty", &row.3)?,
        avg_entry_price: decimal("avg_entry_price", &row.4)?,
        current_price: decimal("current_price", &row.5)?,
        stop_loss_price: decimal("stop_loss_price", &row.6)?,
        opened_at: datetime(row.7),
    })
}

fn account_from_row(row: AccountRow) -> Result<VirtualAccount> {
    Ok(VirtualAccount {
        va_id: row.0,
        balance: decimal("balance", &row.1)?,
        realized_pnl: decimal("realized_pnl", &row.2)?,
        wins: row.3 as u32,
        losses: row.4 as u32,
        consecutive_losses: row.5 as u32,
        peak_equity: decimal("peak_equity", &row.6)?,
        max_drawdown: decimal("max_drawdown", &row.7)?,
        cooldown_until: row.8.map(datetime),
        kill_switch: row.9,
    })
}

fn trade_from_row(row: TradeRow) -> Result<Trade> {
    Ok(Trade {
        trade_id: row.0,
        va_id: row.1,
        symbol: row.2,
        side: row.3.parse().map_err(anyhow::Error::msg)?,
        qty: decimal("qty", &row.4)?,
        entry_price: decimal("entry_price", &row.5)?,
        exit_price: decimal("exit_price", &row.6)?,
        realized_pnl: decimal("realized_pnl", &row.7)?,
        closed_at: datetime(row.8),
        reason: row.9.parse().map_err(anyhow::Error::msg)?,
    })
}

const SELECT_ORDER_COLUMNS: &str = "order_id, va_id, symbol, side, intent, qty_requested, \
     qty_filled, avg_fill_price, status, stop_loss_price, linked_entry_id, created_at, \
     last_update_at";

const UPDATE_ORDER_SQL: &str = r#"
    UPDATE orders SET
        qty_requested = $2,
        qty_filled = $3,
        avg_fill_price = $4,
        status = $5,
        last_update_at = $6
    WHERE order_id = $1
    "#;

const UPSERT_POSITION_SQL: &str = r#"
    INSERT INTO positions (
        va_id, symbol, side, qty, avg_entry_price, current_price, stop_loss_price, opened_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT(va_id, symbol) DO UPDATE SET
        qty = excluded.qty,
        avg_entry_price = excluded.avg_entry_price,
        current_price = excluded.current_price,
        stop_loss_price = excluded.stop_loss_price
    "#;

const UPSERT_ACCOUNT_SQL: &str = r#"
    INSERT INTO virtual_accounts (
        va_id, balance, realized_pnl, wins, losses, consecutive_losses,
        peak_equity, max_drawdown, cooldown_until, kill_switch
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT(va_id) DO UPDATE SET
        balance = excluded.balance,
        realized_pnl = excluded.realized_pnl,
        wins = excluded.wins,
        losses = excluded.losses,
        consecutive_losses = excluded.consecutive_losses,
        peak_equity = excluded.peak_equity,
        max_drawdown = excluded.max_drawdown,
        cooldown_until = excluded.cooldown_until,
        kill_switch = excluded.kill_switch
    "#;

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn load_accounts(&self) -> Result<Vec<VirtualAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT va_id, balance, realized_pnl, wins, losses, consecutive_losses,
                   peak_equity, max_drawdown, cooldown_until, kill_switch
            FROM virtual_accounts
            ORDER BY va_id
            "#,
        )
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to load virtual accounts")?;

        rows.into_iter().map(account_from_row).collect()
    }

    async fn save_account(&self, account: &VirtualAccount) -> Result<()> {
        sqlx::query(UPSERT_ACCOUNT_SQL)
            .bind(&account.va_id)
            .bind(account.balance.to_string())
            .bind(account.realized_pnl.to_string())
            .bind(account.wins as i64)
            .bind(account.losses as i64)
            .bind(account.consecutive_losses as i64)
            .bind(account.peak_equity.to_string())
            .bind(account.max_drawdown.to_string())
            .bind(account.cooldown_until.map(|t| t.timestamp_millis()))
            .bind(account.kill_switch)
            .execute(&self.db.pool)
            .await
            .context("Failed to save virtual account")?;
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, va_id, symbol, side, intent, qty_requested, qty_filled,
                avg_fill_price, status, stop_loss_price, linked_entry_id,
                created_at, last_update_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.va_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.intent.as_str())
        .bind(order.qty_requested.to_string())
        .bind(order.qty_filled.to_string())
        .bind(order.avg_fill_price.map(|p| p.to_string()))
        .bind(order.status.as_str())
        .bind(order.stop_loss_price.map(|p| p.to_string()))
        .bind(&order.linked_entry_id)
        .bind(order.created_at.timestamp_millis())
        .bind(order.last_update_at.timestamp_millis())
        .execute(&self.db.pool)
        .await
        .context("Failed to insert order")?;
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        sqlx::query(UPDATE_ORDER_SQL)
            .bind(&order.order_id)
            .bind(order.qty_requested.to_string())
            .bind(order.qty_filled.to_string())
            .bind(order.avg_fill_price.map(|p| p.to_string()))
            .bind(order.status.as_str())
            .bind(order.last_update_at.timestamp_millis())
            .execute(&self.db.pool)
            .await
            .context("Failed to update order")?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.db.pool)
        .await
        .context("Failed to load order")?;

        row.map(order_from_row).transpose()
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_ORDER_COLUMNS} FROM orders \
             WHERE status IN ('PENDING', 'PARTIAL') ORDER BY created_at"
        ))
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to load open orders")?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn stale_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_ORDER_COLUMNS} FROM orders \
             WHERE status IN ('PENDING', 'PARTIAL') AND last_update_at < $1 \
             ORDER BY last_update_at"
        ))
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to load stale orders")?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn live_stop_for_position(&self, va_id: &str, symbol: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_ORDER_COLUMNS} FROM orders \
             WHERE intent = 'STOP_LOSS' AND va_id = $1 AND symbol = $2 \
               AND status IN ('PENDING', 'PARTIAL') \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(va_id)
        .bind(symbol)
        .fetch_optional(&self.db.pool)
        .await
        .context("Failed to look up live stop order")?;

        row.map(order_from_row).transpose()
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT va_id, symbol, side, qty, avg_entry_price, current_price,
                   stop_loss_price, opened_at
            FROM positions
            ORDER BY opened_at
            "#,
        )
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to load open positions")?;

        rows.into_iter().map(position_from_row).collect()
    }

    async fn get_position(&self, va_id: &str, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT va_id, symbol, side, qty, avg_entry_price, current_price,
                   stop_loss_price, opened_at
            FROM positions
            WHERE va_id = $1 AND symbol = $2
            "#,
        )
        .bind(va_id)
        .bind(symbol)
        .fetch_optional(&self.db.pool)
        .await
        .context("Failed to load position")?;

        row.map(position_from_row).transpose()
    }

    async fn symbol_owner(&self, symbol: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT va_id FROM positions WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.db.pool)
            .await
            .context("Failed to look up symbol owner")?;
        Ok(row.map(|(va_id,)| va_id))
    }

    async fn update_position_price(&self, va_id: &str, symbol: &str, price: Decimal) -> Result<()> {
        sqlx::query("UPDATE positions SET current_price = $3 WHERE va_id = $1 AND symbol = $2")
            .bind(va_id)
            .bind(symbol)
            .bind(price.to_string())
            .execute(&self.db.pool)
            .await
            .context("Failed to update position price")?;
        Ok(())
    }

    async fn apply_entry_fill(&self, order: &Order, position: &Position) -> Result<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .context("Failed to begin entry-fill transaction")?;

        sqlx::query(UPDATE_ORDER_SQL)
            .bind(&order.order_id)
            .bind(order.qty_requested.to_string())
            .bind(order.qty_filled.to_string())
            .bind(order.avg_fill_price.map(|p| p.to_string()))
            .bind(order.status.as_str())
            .bind(order.last_update_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to update order in entry-fill transaction")?;

        sqlx::query(UPSERT_POSITION_SQL)
            .bind(&position.va_id)
            .bind(&position.symbol)
            .bind(position.side.as_str())
            .bind(position.qty.to_string())
            .bind(position.avg_entry_price.to_string())
            .bind(position.current_price.to_string())
            .bind(position.stop_loss_price.to_string())
            .bind(position.opened_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to upsert position in entry-fill transaction")?;

        tx.commit()
            .await
            .context("Failed to commit entry-fill transaction")?;
        Ok(())
    }

    async fn apply_exit_fill(&self, order: &Order, position: &Position) -> Result<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .context("Failed to begin exit-fill transaction")?;

        sqlx::query(UPDATE_ORDER_SQL)
            .bind(&order.order_id)
            .bind(order.qty_requested.to_string())
            .bind(order.qty_filled.to_string())
            .bind(order.avg_fill_price.map(|p| p.to_string()))
            .bind(order.status.as_str())
            .bind(order.last_update_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to update order in exit-fill transaction")?;

        sqlx::query(
            "UPDATE positions SET qty = $3, current_price = $4 WHERE va_id = $1 AND symbol = $2",
        )
        .bind(&position.va_id)
        .bind(&position.symbol)
        .bind(position.qty.to_string())
        .bind(position.current_price.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to reduce position in exit-fill transaction")?;

        tx.commit()
            .await
            .context("Failed to commit exit-fill transaction")?;
        Ok(())
    }

    async fn close_position(
        &self,
        order: &Order,
        trade: &Trade,
        account: &VirtualAccount,
    ) -> Result<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .context("Failed to begin close transaction")?;

        sqlx::query(UPDATE_ORDER_SQL)
            .bind(&order.order_id)
            .bind(order.qty_requested.to_string())
            .bind(order.qty_filled.to_string())
            .bind(order.avg_fill_price.map(|p| p.to_string()))
            .bind(order.status.as_str())
            .bind(order.last_update_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to update order in close transaction")?;

        sqlx::query("DELETE FROM positions WHERE va_id = $1 AND symbol = $2")
            .bind(&trade.va_id)
            .bind(&trade.symbol)
            .execute(&mut *tx)
            .await
            .context("Failed to delete position in close transaction")?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, va_id, symbol, side, qty, entry_price, exit_price,
                realized_pnl, closed_at, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&trade.trade_id)
        .bind(&trade.va_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.qty.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.realized_pnl.to_string())
        .bind(trade.closed_at.timestamp_millis())
        .bind(trade.reason.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to append trade in close transaction")?;

        sqlx::query(UPSERT_ACCOUNT_SQL)
            .bind(&account.va_id)
            .bind(account.balance.to_string())
            .bind(account.realized_pnl.to_string())
            .bind(account.wins as i64)
            .bind(account.losses as i64)
            .bind(account.consecutive_losses as i64)
            .bind(account.peak_equity.to_string())
            .bind(account.max_drawdown.to_string())
            .bind(account.cooldown_until.map(|t| t.timestamp_millis()))
            .bind(account.kill_switch)
            .execute(&mut *tx)
            .await
            .context("Failed to settle account in close transaction")?;

        tx.commit()
            .await
            .context("Failed to commit close transaction")?;
        Ok(())
    }

    async fn trades_for_account(&self, va_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT trade_id, va_id, symbol, side, qty, entry_price, exit_price,
                   realized_pnl, closed_at, reason
            FROM trades
            WHERE va_id = $1
            ORDER BY closed_at
            "#,
        )
        .bind(va_id)
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to load trades")?;

        rows.into_iter().map(trade_from_row).collect()
    }

    async fn record_incident(&self, kind: &str, detail: &str, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO incidents (ts, kind, detail) VALUES ($1, $2, $3)")
            .bind(ts.timestamp_millis())
            .bind(kind)
            .bind(detail)
            .execute(&self.db.pool)
            .await
            .context("Failed to record incident")?;
        Ok(())
    }

    async fn incident_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM incidents")
            .fetch_one(&self.db.pool)
            .await
            .context("Failed to count incidents")?;
        Ok(count as u64)
    }

    async fn close(&self) {
        self.db.pool.close().await;
    }
}
