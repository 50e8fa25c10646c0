//! Read-only projection for operators.
//!
//! A consistent snapshot of accounts, open positions, and system status,
//! built from the store. Never mutates state; the engine pushes it as a
//! single JSON log line on an interval, and any other consumer may call
//! [`DashboardView::snapshot`] directly.

use crate::application::engine::EngineCounters;
use crate::config::EngineConfig;
use crate::domain::repositories::TradeStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub accounts: Vec<AccountView>,
    pub positions: Vec<PositionView>,
    pub system: SystemStatus,
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub va_id: String,
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_losses: u32,
    pub peak_equity: Decimal,
    pub max_drawdown: Decimal,
    pub cooldown_remaining_seconds: Option<i64>,
    pub kill_switch: bool,
}

#[derive(Debug, Serialize)]
pub struct PositionView {
    pub va_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub kill_switch_enabled: bool,
    pub max_spread_bps: f64,
    pub max_slippage_bps: f64,
    pub max_latency_ms: f64,
    pub reconcile_interval_seconds: u64,
    pub incidents: u64,
    #[serde(flatten)]
    pub counters: EngineCounters,
}

pub struct DashboardView {
    store: Arc<dyn TradeStore>,
}

impl DashboardView {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot(
        &self,
        config: &EngineConfig,
        counters: &EngineCounters,
        now: DateTime<Utc>,
    ) -> Result<DashboardSnapshot> {
        let accounts = self
            .store
            .load_accounts()
            .await?
            .into_iter()
            .map(|account| {
                let cooldown_remaining_seconds = account
                    .cooldown_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).num_seconds());
                AccountView {
                    va_id: account.va_id,
                    balance: account.balance,
                    realized_pnl: account.realized_pnl,
                    wins: account.wins,
                    losses: account.losses,
                    consecutive_losses: account.consecutive_losses,
                    peak_equity: account.peak_equity,
                    max_drawdown: account.max_drawdown,
                    cooldown_remaining_seconds,
                    kill_switch: account.kill_switch,
                }
            })
            .collect();

        let positions = self
            .store
            .open_positions()
            .await?
            .into_iter()
            .map(|position| PositionView {
                va_id: position.va_id.clone(),
                symbol: position.symbol.clone(),
                side: position.side.to_string(),
                qty: position.qty,
                avg_entry_price: position.avg_entry_price,
                current_price: position.current_price,
                stop_loss_price: position.stop_loss_price,
                unrealized_pnl: position.unrealized_pnl(),
            })
            .collect();

        Ok(DashboardSnapshot {
            generated_at: now,
            accounts,
            positions,
            system: SystemStatus {
                kill_switch_enabled: config.kill_switch_enabled,
                max_spread_bps: config.max_spread_bps,
                max_slippage_bps: config.max_slippage_bps,
                max_latency_ms: config.max_latency_ms,
                reconcile_interval_seconds: config.reconcile_interval_seconds,
                incidents: self.store.incident_count().await?,
                counters: counters.clone(),
            },
        })
    }
}
