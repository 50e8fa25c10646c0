//! Paper exchange adapter.
//!
//! Accepts every order unless told otherwise, with scripted fills and
//! market ticks pushed in by tests or a simulator. Also the adapter the
//! headless binary runs with when no real venue is wired up.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{CancelAck, ExchangeAdapter, ExchangeOrderView, OrderSpec};
use crate::domain::types::{FillEvent, MarketSnapshot, MarketTick, OrderIntent, OrderStatus};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, RwLock};

pub struct MockExchange {
    fill_tx: Sender<FillEvent>,
    fill_rx: Mutex<Option<Receiver<FillEvent>>>,
    tick_tx: Sender<MarketTick>,
    tick_rx: Mutex<Option<Receiver<MarketTick>>>,
    submissions: RwLock<Vec<OrderSpec>>,
    cancels: RwLock<Vec<String>>,
    query_views: RwLock<HashMap<String, ExchangeOrderView>>,
    reject_all: AtomicBool,
    reject_stop_orders: AtomicBool,
    offline: AtomicBool,
}

impl MockExchange {
    pub fn new() -> Self {
        let (fill_tx, fill_rx) = mpsc::channel(256);
        let (tick_tx, tick_rx) = mpsc::channel(256);
        Self {
            fill_tx,
            fill_rx: Mutex::new(Some(fill_rx)),
            tick_tx,
            tick_rx: Mutex::new(Some(tick_rx)),
            submissions: RwLock::new(Vec::new()),
            cancels: RwLock::new(Vec::new()),
            query_views: RwLock::new(HashMap::new()),
            reject_all: AtomicBool::new(false),
            reject_stop_orders: AtomicBool::new(false),
            offline: AtomicBool::new(false),
        }
    }

    pub async fn push_fill(&self, fill: FillEvent) {
        let _ = self.fill_tx.send(fill).await;
    }

    /// Fill an order we saw submitted, stamped now.
    pub async fn fill_order(&self, order_id: &str, qty: Decimal, price: Decimal) {
        self.push_fill(FillEvent {
            order_id: order_id.to_string(),
            qty_increment: qty,
            price,
            ts: Utc::now(),
        })
        .await;
    }

    pub async fn push_tick(&self, symbol: &str, snapshot: MarketSnapshot) {
        let _ = self
            .tick_tx
            .send(MarketTick {
                symbol: symbol.to_string(),
                snapshot,
            })
            .await;
    }

    /// Convenience tick with a tight book around `last`.
    pub async fn push_price(&self, symbol: &str, last: Decimal) {
        let tick = Decimal::new(1, 2); // 0.01
        self.push_tick(
            symbol,
            MarketSnapshot {
                bid: last - tick,
                ask: last + tick,
                last,
                as_of: Utc::now(),
                source_latency_ms: 0,
            },
        )
        .await;
    }

    pub async fn submissions(&self) -> Vec<OrderSpec> {
        self.submissions.read().await.clone()
    }

    pub async fn latest_submission(&self, intent: OrderIntent) -> Option<OrderSpec> {
        self.submissions
            .read()
            .await
            .iter()
            .rev()
            .find(|spec| spec.intent == intent)
            .cloned()
    }

    pub async fn cancels(&self) -> Vec<String> {
        self.cancels.read().await.clone()
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_stop_orders(&self, reject: bool) {
        self.reject_stop_orders.store(reject, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Script what `query_order` reports for an order id.
    pub async fn set_query_view(&self, order_id: &str, view: ExchangeOrderView) {
        self.query_views
            .write()
            .await
            .insert(order_id.to_string(), view);
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn submit_order(&self, spec: &OrderSpec) -> Result<(), ExchangeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExchangeError::Unavailable("mock exchange offline".to_string()));
        }
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected("rejected by harness".to_string()));
        }
        if spec.intent == OrderIntent::StopLoss && self.reject_stop_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected("stop orders disabled".to_string()));
        }
        self.submissions.write().await.push(spec.clone());
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck, ExchangeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExchangeError::Unavailable("mock exchange offline".to_string()));
        }
        self.cancels.write().await.push(order_id.to_string());
        Ok(CancelAck::Canceled)
    }

    async fn query_order(&self, order_id: &str) -> Result<ExchangeOrderView, ExchangeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExchangeError::Unavailable("mock exchange offline".to_string()));
        }
        Ok(self
            .query_views
            .read()
            .await
            .get(order_id)
            .cloned()
            .unwrap_or(ExchangeOrderView {
                status: OrderStatus::Pending,
                qty_filled: Decimal::ZERO,
                avg_fill_price: None,
            }))
    }

    async fn fill_stream(&self) -> Result<Receiver<FillEvent>, ExchangeError> {
        self.fill_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ExchangeError::Unavailable("fill stream already taken".to_string()))
    }

    async fn market_stream(&self) -> Result<Receiver<MarketTick>, ExchangeError> {
        self.tick_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ExchangeError::Unavailable("market stream already taken".to_string()))
    }
}
