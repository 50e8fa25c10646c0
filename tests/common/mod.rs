//! Shared harness for driving the full engine against an in-memory store
//! and the paper exchange.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vatrade::application::engine::ExecutionEngine;
use vatrade::application::signal_queue::SignalQueue;
use vatrade::config::EngineConfig;
use vatrade::domain::ports::OrderSpec;
use vatrade::domain::position::Position;
use vatrade::domain::repositories::TradeStore;
use vatrade::domain::trade::Trade;
use vatrade::domain::types::{MarketSnapshot, OrderIntent, OrderSide, Signal};
use vatrade::infrastructure::mock::MockExchange;
use vatrade::infrastructure::persistence::database::Database;
use vatrade::infrastructure::persistence::store::SqliteStore;

const POLL: Duration = Duration::from_millis(25);
const POLL_ROUNDS: usize = 400;

/// Engine defaults tuned for tests: window open around the clock, latency
/// gate effectively off, background timers parked unless a test needs
/// them.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.trading_window_start = None;
    config.trading_window_end = None;
    config.max_latency_ms = 60_000.0;
    config.reconcile_interval_seconds = 3600;
    config.dashboard_interval_seconds = 3600;
    config.exchange_timeout_ms = 500;
    config
}

pub fn market(last: Decimal) -> MarketSnapshot {
    let half_tick = dec!(0.01);
    MarketSnapshot {
        bid: last - half_tick,
        ask: last + half_tick,
        last,
        as_of: Utc::now(),
        source_latency_ms: 0,
    }
}

pub fn signal(va_id: &str, symbol: &str, side: OrderSide, qty: Decimal, last: Decimal) -> Signal {
    Signal {
        va_id: va_id.to_string(),
        symbol: symbol.to_string(),
        side,
        desired_qty: qty,
        expected_price: None,
        snapshot: market(last),
        received_at: Utc::now(),
    }
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub exchange: Arc<MockExchange>,
    pub queue: Arc<SignalQueue>,
    pub shutdown: watch::Sender<bool>,
    pub engine_task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    pub async fn start(config: EngineConfig) -> Self {
        Self::start_with_database(config, Database::in_memory().await.unwrap()).await
    }

    pub async fn start_with_database(config: EngineConfig, database: Database) -> Self {
        let store = Arc::new(SqliteStore::new(database));
        let exchange = Arc::new(MockExchange::new());
        let engine = ExecutionEngine::build(config, store.clone(), exchange.clone())
            .await
            .unwrap();
        let queue = engine.signal_queue();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let engine_task = tokio::spawn(engine.run(shutdown_rx));
        Self {
            store,
            exchange,
            queue,
            shutdown,
            engine_task,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.engine_task.await;
    }

    pub async fn push(&self, signal: Signal) {
        self.queue.push(signal).await;
    }

    /// Let the loop drain anything in flight before a negative assertion.
    pub async fn settle_idle(&self) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    /// Wait until `n` submissions matching `(intent, symbol)` were seen;
    /// returns the latest.
    pub async fn wait_submission(&self, intent: OrderIntent, symbol: &str, n: usize) -> OrderSpec {
        for _ in 0..POLL_ROUNDS {
            let matching: Vec<OrderSpec> = self
                .exchange
                .submissions()
                .await
                .into_iter()
                .filter(|spec| spec.intent == intent && spec.symbol == symbol)
                .collect();
            if matching.len() >= n {
                return matching.last().unwrap().clone();
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for {n} {intent:?} submission(s) on {symbol}");
    }

    pub async fn submission_count(&self, intent: OrderIntent, symbol: &str) -> usize {
        self.exchange
            .submissions()
            .await
            .iter()
            .filter(|spec| spec.intent == intent && spec.symbol == symbol)
            .count()
    }

    pub async fn wait_position(&self, va_id: &str, symbol: &str) -> Position {
        for _ in 0..POLL_ROUNDS {
            if let Some(position) = self.store.get_position(va_id, symbol).await.unwrap() {
                return position;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for position {va_id}/{symbol}");
    }

    pub async fn wait_position_qty(&self, va_id: &str, symbol: &str, qty: Decimal) -> Position {
        for _ in 0..POLL_ROUNDS {
            if let Some(position) = self.store.get_position(va_id, symbol).await.unwrap()
                && position.qty == qty
            {
                return position;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for {va_id}/{symbol} to reach qty {qty}");
    }

    pub async fn wait_position_gone(&self, va_id: &str, symbol: &str) {
        for _ in 0..POLL_ROUNDS {
            if self.store.get_position(va_id, symbol).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for position {va_id}/{symbol} to close");
    }

    pub async fn wait_trades(&self, va_id: &str, n: usize) -> Vec<Trade> {
        for _ in 0..POLL_ROUNDS {
            let trades = self.store.trades_for_account(va_id).await.unwrap();
            if trades.len() >= n {
                return trades;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for {n} trade(s) on {va_id}");
    }

    pub async fn wait_incidents(&self, n: u64) {
        for _ in 0..POLL_ROUNDS {
            if self.store.incident_count().await.unwrap() >= n {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("timed out waiting for {n} incident(s)");
    }

    /// Drive an entry to a full fill: push the signal, fill the submitted
    /// entry, and wait for the position. `nth` is the 1-based count of
    /// entry submissions expected on the symbol so far.
    pub async fn open_position(
        &self,
        va_id: &str,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
        nth: usize,
    ) -> Position {
        self.push(signal(va_id, symbol, OrderSide::Buy, qty, price)).await;
        let entry = self.wait_submission(OrderIntent::Entry, symbol, nth).await;
        self.exchange.fill_order(&entry.order_id, qty, price).await;
        self.wait_position_qty(va_id, symbol, qty).await
    }

    /// Trigger the stop with a price tick and fill the synthesized close.
    /// `nth` is the 1-based count of reduce-only submissions expected on
    /// the symbol so far.
    pub async fn stop_out(&self, va_id: &str, symbol: &str, trigger_price: Decimal, nth: usize) {
        self.exchange.push_price(symbol, trigger_price).await;
        let close = self
            .wait_submission(OrderIntent::ReduceOnlyExit, symbol, nth)
            .await;
        self.exchange
            .fill_order(&close.order_id, close.qty, trigger_price)
            .await;
        self.wait_position_gone(va_id, symbol).await;
    }
}
