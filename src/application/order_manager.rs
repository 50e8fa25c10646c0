use crate::application::governor::Governor;
use crate::domain::account::VirtualAccount;
use crate::domain::errors::{ExchangeError, OrderError};
use crate::domain::order::Order;
use crate::domain::ports::{ExchangeAdapter, OrderSpec};
use crate::domain::position::Position;
use crate::domain::repositories::TradeStore;
use crate::domain::trade::Trade;
use crate::domain::types::{
    CloseReason, FillEvent, MarketTick, OrderIntent, OrderSide, OrderStatus, Signal,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Stop distance from entry as a fraction (0.02 = 2%).
    pub stop_loss_fraction: Decimal,
    pub exchange_timeout: std::time::Duration,
    pub stale_order_threshold: Duration,
    pub stop_loss_failure_kill_threshold: u32,
    pub reconcile_failure_limit: u32,
}

/// Result of trying to place an order for a signal.
#[derive(Debug)]
pub enum Placement {
    Placed(Order),
    /// The store-level ownership re-check found the symbol held elsewhere.
    Conflict { owner: String },
    /// A close for this position is already in flight.
    AlreadyClosing,
}

/// What one applied fill did to the book. The engine feeds these to the
/// governor and router; the order manager itself never reaches back into
/// them.
#[derive(Debug)]
pub enum FillOutcome {
    Ignored { reason: &'static str },
    EntryFilled {
        order: Order,
        position: Position,
        /// True when this fill created the position.
        opened: bool,
        /// Consecutive stop-attach failures for the VA; zero when the
        /// protective stop is live.
        attach_failures: u32,
    },
    Reduced { order: Order, position: Position },
    Closed {
        order: Order,
        trade: Trade,
        /// Settled account, already persisted in the close transaction.
        account: VirtualAccount,
    },
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Fills the exchange reported that we had not seen; the engine runs
    /// them through the normal fill path.
    pub adopted_fills: Vec<FillEvent>,
    /// `(va_id, symbol)` reservations freed by entries that died unfilled.
    pub released: Vec<(String, String)>,
}

/// Stop price at the configured fraction from the reference: below entry
/// for longs, above for shorts.
pub(crate) fn protective_price(side: OrderSide, reference: Decimal, fraction: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => reference * (Decimal::ONE - fraction),
        OrderSide::Sell => reference * (Decimal::ONE + fraction),
    }
}

/// Order lifecycle, mandatory stop-loss enforcement, fill accounting,
/// trigger detection, and reconciliation against the exchange.
///
/// Holds the in-memory position book (keyed by symbol; ownership is
/// globally unique) plus bookkeeping for live stops and in-flight closes.
/// Every durable mutation goes through the store first; caches update
/// only after the commit.
pub struct OrderManager {
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn ExchangeAdapter>,
    config: OrderManagerConfig,
    positions: HashMap<String, Position>,
    /// symbol -> live stop-loss order id.
    stops: HashMap<String, String>,
    /// Symbols with a close order in flight; guards double submission.
    closing: HashSet<String>,
    /// Close order id -> reason the eventual trade will carry.
    close_reasons: HashMap<String, CloseReason>,
    /// va_id -> consecutive stop-attach failures.
    stop_attach_failures: HashMap<String, u32>,
    reconcile_failures: u32,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn ExchangeAdapter>,
        config: OrderManagerConfig,
    ) -> Self {
        Self {
            store,
            exchange,
            config,
            positions: HashMap::new(),
            stops: HashMap::new(),
            closing: HashSet::new(),
            close_reasons: HashMap::new(),
            stop_attach_failures: HashMap::new(),
            reconcile_failures: 0,
        }
    }

    /// Rebuild the in-memory book from the store after a restart.
    pub async fn rehydrate(&mut self) -> Result<(), OrderError> {
        let positions = self.store.open_positions().await?;
        self.positions = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        for order in self.store.open_orders().await? {
            match order.intent {
                OrderIntent::StopLoss => {
                    self.stops.insert(order.symbol.clone(), order.order_id.clone());
                }
                OrderIntent::ReduceOnlyExit => {
                    self.closing.insert(order.symbol.clone());
                    let reason = if order.linked_entry_id.is_some() {
                        CloseReason::StopLoss
                    } else {
                        CloseReason::ManualExit
                    };
                    self.close_reasons.insert(order.order_id.clone(), reason);
                }
                OrderIntent::Entry => {}
            }
        }
        info!(
            "OrderManager: Rehydrated {} position(s), {} live stop(s), {} close(s) in flight",
            self.positions.len(),
            self.stops.len(),
            self.closing.len()
        );
        Ok(())
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn attach_failures(&self, va_id: &str) -> u32 {
        self.stop_attach_failures.get(va_id).copied().unwrap_or(0)
    }

    /// Place an entry order for an admitted signal. The stop price is
    /// computed here so the order is never persisted without one.
    pub async fn place_entry(
        &mut self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<Placement, OrderError> {
        // Global ownership re-check; the router only sees its own VA map.
        if let Some(owner) = self.store.symbol_owner(&signal.symbol).await?
            && owner != signal.va_id
        {
            return Ok(Placement::Conflict { owner });
        }

        let reference = signal.snapshot.last;
        let stop_price = protective_price(signal.side, reference, self.config.stop_loss_fraction);
        let mut order = Order::entry(
            &signal.va_id,
            &signal.symbol,
            signal.side,
            signal.desired_qty,
            stop_price,
            now,
        );
        self.store.insert_order(&order).await?;
        self.submit_to_exchange(&mut order, now).await?;

        info!(
            "OrderManager: Entry {} {} {} x{} placed for {} (stop {})",
            order.order_id, order.side, order.symbol, order.qty_requested, order.va_id, stop_price
        );
        Ok(Placement::Placed(order))
    }

    /// Place a reduce-only close for an existing position. Used for manual
    /// exit signals; quantity is capped at the open quantity so the
    /// position can never flip.
    pub async fn place_exit(
        &mut self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<Placement, OrderError> {
        let Some(position) = self.positions.get(&signal.symbol).cloned() else {
            return Err(OrderError::PositionNotFound {
                va_id: signal.va_id.clone(),
                symbol: signal.symbol.clone(),
            });
        };
        if position.va_id != signal.va_id {
            return Ok(Placement::Conflict { owner: position.va_id });
        }
        if self.closing.contains(&signal.symbol) {
            return Ok(Placement::AlreadyClosing);
        }

        let qty = signal.desired_qty.min(position.qty);
        let mut order = Order::reduce_only(
            &signal.va_id,
            &signal.symbol,
            position.side.opposite(),
            qty,
            None,
            now,
        );
        self.store.insert_order(&order).await?;
        self.close_reasons
            .insert(order.order_id.clone(), CloseReason::ManualExit);
        if let Err(err) = self.submit_to_exchange(&mut order, now).await {
            self.close_reasons.remove(&order.order_id);
            return Err(err);
        }
        self.closing.insert(signal.symbol.clone());
        info!(
            "OrderManager: Exit {} {} x{} placed for {}",
            order.order_id, order.symbol, qty, order.va_id
        );
        Ok(Placement::Placed(order))
    }

    /// Apply one fill event atomically. Out-of-order and overfilling
    /// events are refused without touching state.
    pub async fn handle_fill(
        &mut self,
        fill: FillEvent,
        governor: &Governor,
        via_reconcile: bool,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, OrderError> {
        let Some(mut order) = self.store.get_order(&fill.order_id).await? else {
            warn!("OrderManager: Fill for unknown order {} dropped", fill.order_id);
            return Ok(FillOutcome::Ignored { reason: "unknown_order" });
        };
        if order.is_terminal() {
            warn!(
                "OrderManager: Fill for terminal order {} ({}) dropped",
                order.order_id, order.status
            );
            return Ok(FillOutcome::Ignored { reason: "terminal_order" });
        }
        if fill.ts < order.last_update_at {
            warn!(
                "OrderManager: Out-of-order fill for {} dropped ({} < {})",
                order.order_id, fill.ts, order.last_update_at
            );
            return Ok(FillOutcome::Ignored { reason: "out_of_order" });
        }
        if fill.qty_increment <= Decimal::ZERO {
            return Ok(FillOutcome::Ignored { reason: "non_positive_qty" });
        }

        if let Err(err) = order.apply_fill(&fill) {
            if matches!(err, OrderError::InconsistentFill { .. }) {
                self.store
                    .record_incident("inconsistent_fill", &err.to_string(), now)
                    .await?;
                error!("OrderManager: {err}");
            }
            return Err(err);
        }

        match order.intent {
            OrderIntent::Entry => self.apply_entry(order, &fill, now).await,
            OrderIntent::StopLoss | OrderIntent::ReduceOnlyExit => {
                self.apply_exit(order, &fill, governor, via_reconcile, now).await
            }
        }
    }

    async fn apply_entry(
        &mut self,
        order: Order,
        fill: &FillEvent,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, OrderError> {
        let (position, opened) = match self.positions.get(&order.symbol) {
            Some(existing) if existing.va_id == order.va_id => {
                let mut position = existing.clone();
                position.apply_entry_fill(fill.qty_increment, fill.price);
                (position, false)
            }
            Some(existing) => {
                let detail = format!(
                    "entry fill for {} on {} but {} owns the symbol",
                    order.va_id, order.symbol, existing.va_id
                );
                self.store
                    .record_incident("symbol_ownership_conflict", &detail, now)
                    .await?;
                error!("OrderManager: {detail}");
                return Ok(FillOutcome::Ignored { reason: "ownership_conflict" });
            }
            None => {
                let stop_price = order.stop_loss_price.unwrap_or_else(|| {
                    protective_price(order.side, fill.price, self.config.stop_loss_fraction)
                });
                (
                    Position::open(
                        &order.va_id,
                        &order.symbol,
                        order.side,
                        fill.qty_increment,
                        fill.price,
                        stop_price,
                        now,
                    ),
                    true,
                )
            }
        };

        self.store.apply_entry_fill(&order, &position).await?;
        self.positions.insert(order.symbol.clone(), position.clone());

        let attach_failures = self.sync_stop(&order, &position, now).await?;
        Ok(FillOutcome::EntryFilled {
            order,
            position,
            opened,
            attach_failures,
        })
    }

    /// Keep the protective stop alive and sized to the cumulative fill.
    /// Returns the VA's consecutive attach-failure count (0 = protected).
    async fn sync_stop(
        &mut self,
        entry: &Order,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Result<u32, OrderError> {
        match self.stops.get(&entry.symbol).cloned() {
            None => {
                let stop = Order::stop_loss(entry, position.qty, now);
                let attached = self.attach_stop(stop, position, now).await?;
                if attached {
                    self.stop_attach_failures.remove(&position.va_id);
                    Ok(0)
                } else {
                    Ok(self.attach_failures(&position.va_id))
                }
            }
            Some(stop_id) => {
                let Some(mut stop) = self.store.get_order(&stop_id).await? else {
                    self.stops.remove(&entry.symbol);
                    return Ok(self.attach_failures(&position.va_id));
                };
                if stop.is_terminal() {
                    // The tracked stop died; put a fresh one on.
                    self.stops.remove(&entry.symbol);
                    let fresh = Order::stop_loss(entry, position.qty, now);
                    let attached = self.attach_stop(fresh, position, now).await?;
                    return Ok(if attached {
                        self.stop_attach_failures.remove(&position.va_id);
                        0
                    } else {
                        self.attach_failures(&position.va_id)
                    });
                }
                if stop.qty_requested == position.qty {
                    return Ok(0);
                }
                // Resize: cancel the resting stop and re-submit it with the
                // new cumulative quantity under the same id.
                let _ = tokio::time::timeout(
                    self.config.exchange_timeout,
                    self.exchange.cancel_order(&stop_id),
                )
                .await;
                stop.qty_requested = position.qty;
                stop.last_update_at = now;
                self.store.update_order(&stop).await?;
                match self.submit_to_exchange(&mut stop, now).await {
                    Ok(()) => {
                        info!(
                            "OrderManager: Stop {} resized to {} for {}",
                            stop.order_id, position.qty, entry.symbol
                        );
                        Ok(0)
                    }
                    Err(OrderError::ExchangeRejected { reason, .. }) => {
                        self.stops.remove(&entry.symbol);
                        self.on_attach_failure(entry.order_id.clone(), position, reason, now)
                            .await?;
                        Ok(self.attach_failures(&position.va_id))
                    }
                    Err(other) => Err(other),
                }
            }
        }
    }

    /// Persist and submit a stop order. On exchange rejection the position
    /// is panic-closed rather than left naked.
    async fn attach_stop(
        &mut self,
        mut stop: Order,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let entry_id = stop.linked_entry_id.clone();
        self.store.insert_order(&stop).await?;
        match self.submit_to_exchange(&mut stop, now).await {
            Ok(()) => {
                self.stops.insert(stop.symbol.clone(), stop.order_id.clone());
                Ok(true)
            }
            Err(OrderError::ExchangeRejected { reason, .. }) => {
                self.on_attach_failure(entry_id.unwrap_or_default(), position, reason, now)
                    .await?;
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    async fn on_attach_failure(
        &mut self,
        entry_id: String,
        position: &Position,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let failures = {
            let entry = self
                .stop_attach_failures
                .entry(position.va_id.clone())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        let err = OrderError::StopLossAttachFailed {
            entry_id: entry_id.clone(),
            reason,
        };
        error!("OrderManager: {err} (failure #{failures} for {})", position.va_id);
        self.store
            .record_incident("stop_loss_attach_failed", &err.to_string(), now)
            .await?;
        self.panic_close(position, Some(entry_id), now).await
    }

    /// Emergency market exit for a position that cannot be protected.
    async fn panic_close(
        &mut self,
        position: &Position,
        linked_entry_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.closing.contains(&position.symbol) {
            return Ok(());
        }
        let mut close = Order::reduce_only(
            &position.va_id,
            &position.symbol,
            position.side.opposite(),
            position.qty,
            linked_entry_id,
            now,
        );
        self.store.insert_order(&close).await?;
        self.close_reasons
            .insert(close.order_id.clone(), CloseReason::StopLoss);
        match self.submit_to_exchange(&mut close, now).await {
            Ok(()) => {
                self.closing.insert(position.symbol.clone());
                warn!(
                    "OrderManager: Panic-close {} submitted for {}/{} x{}",
                    close.order_id, position.va_id, position.symbol, close.qty_requested
                );
                Ok(())
            }
            Err(err) => {
                // Position stays naked; the next reconciliation tick
                // retries protection.
                self.close_reasons.remove(&close.order_id);
                self.store
                    .record_incident("panic_close_failed", &err.to_string(), now)
                    .await?;
                error!("OrderManager: Panic-close failed for {}: {err}", position.symbol);
                Ok(())
            }
        }
    }

    async fn apply_exit(
        &mut self,
        order: Order,
        fill: &FillEvent,
        governor: &Governor,
        via_reconcile: bool,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, OrderError> {
        let Some(position) = self.positions.get(&order.symbol).cloned() else {
            // Close fill for a position already gone; keep the order row
            // honest and move on.
            self.store.update_order(&order).await?;
            return Ok(FillOutcome::Ignored { reason: "no_position" });
        };
        if position.va_id != order.va_id {
            self.store.update_order(&order).await?;
            return Ok(FillOutcome::Ignored { reason: "ownership_conflict" });
        }

        let close_qty = fill.qty_increment.min(position.qty);
        let mut reduced = position.clone();
        reduced.reduce(close_qty);
        reduced.mark(fill.price);

        if reduced.qty > Decimal::ZERO {
            self.store.apply_exit_fill(&order, &reduced).await?;
            self.positions.insert(order.symbol.clone(), reduced.clone());
            return Ok(FillOutcome::Reduced { order, position: reduced });
        }

        // Position is flat: settle the whole close in one transaction.
        let reason = self.close_reason_for(&order, via_reconcile);
        let exit_price = order.avg_fill_price.unwrap_or(fill.price);
        let trade = Trade::from_close(&position, order.qty_filled, exit_price, reason, fill.ts);
        let account = governor
            .settle_trade(&order.va_id, trade.realized_pnl, fill.ts)
            .ok_or_else(|| {
                OrderError::Store(anyhow::anyhow!("no account cached for {}", order.va_id))
            })?;
        self.store.close_position(&order, &trade, &account).await?;

        self.positions.remove(&order.symbol);
        self.closing.remove(&order.symbol);
        self.close_reasons.remove(&order.order_id);
        self.retire_stop(&order, now).await?;

        info!(
            "OrderManager: {}/{} closed ({}), realized {}",
            trade.va_id, trade.symbol, trade.reason, trade.realized_pnl
        );
        Ok(FillOutcome::Closed { order, trade, account })
    }

    /// Cancel any stop still resting after its position closed.
    async fn retire_stop(&mut self, close: &Order, now: DateTime<Utc>) -> Result<(), OrderError> {
        let Some(stop_id) = self.stops.remove(&close.symbol) else {
            return Ok(());
        };
        if stop_id == close.order_id {
            return Ok(());
        }
        let _ = tokio::time::timeout(
            self.config.exchange_timeout,
            self.exchange.cancel_order(&stop_id),
        )
        .await;
        if let Some(mut stop) = self.store.get_order(&stop_id).await?
            && !stop.is_terminal()
        {
            stop.status = OrderStatus::Canceled;
            stop.last_update_at = now;
            self.store.update_order(&stop).await?;
        }
        Ok(())
    }

    fn close_reason_for(&self, order: &Order, via_reconcile: bool) -> CloseReason {
        if order.intent == OrderIntent::StopLoss {
            return CloseReason::StopLoss;
        }
        if let Some(reason) = self.close_reasons.get(&order.order_id) {
            return *reason;
        }
        if order.linked_entry_id.is_some() {
            return CloseReason::StopLoss;
        }
        if via_reconcile {
            CloseReason::ReconciledClose
        } else {
            CloseReason::ManualExit
        }
    }

    /// Mark the position on a tick, then fire the stop if the price
    /// crossed it: the resting stop is canceled and a reduce-only market
    /// close is synthesized in its place.
    pub async fn on_market_tick(
        &mut self,
        tick: &MarketTick,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError> {
        let price = tick.snapshot.last;
        let Some(position) = self.positions.get_mut(&tick.symbol) else {
            return Ok(None);
        };
        position.mark(price);
        let position = position.clone();
        self.store
            .update_position_price(&position.va_id, &position.symbol, price)
            .await?;

        if !position.stop_triggered(price) || self.closing.contains(&position.symbol) {
            return Ok(None);
        }

        warn!(
            "OrderManager: Stop triggered for {}/{} at {} (stop {})",
            position.va_id, position.symbol, price, position.stop_loss_price
        );

        let mut linked_entry = None;
        if let Some(stop_id) = self.stops.remove(&position.symbol) {
            let _ = tokio::time::timeout(
                self.config.exchange_timeout,
                self.exchange.cancel_order(&stop_id),
            )
            .await;
            if let Some(mut stop) = self.store.get_order(&stop_id).await? {
                linked_entry = stop.linked_entry_id.clone();
                if !stop.is_terminal() {
                    stop.status = OrderStatus::Canceled;
                    stop.last_update_at = now;
                    self.store.update_order(&stop).await?;
                }
            }
        }

        let mut close = Order::reduce_only(
            &position.va_id,
            &position.symbol,
            position.side.opposite(),
            position.qty,
            linked_entry,
            now,
        );
        self.store.insert_order(&close).await?;
        self.close_reasons
            .insert(close.order_id.clone(), CloseReason::StopLoss);
        match self.submit_to_exchange(&mut close, now).await {
            Ok(()) => {
                self.closing.insert(position.symbol.clone());
                Ok(Some(close))
            }
            Err(err) => {
                self.close_reasons.remove(&close.order_id);
                self.store
                    .record_incident("stop_close_rejected", &err.to_string(), now)
                    .await?;
                Err(err)
            }
        }
    }

    /// Periodic pass: the exchange is authoritative for every stale
    /// non-terminal order, and no position may stay unprotected past one
    /// tick.
    pub async fn reconcile(&mut self, now: DateTime<Utc>) -> Result<ReconcileOutcome, OrderError> {
        let cutoff = now - self.config.stale_order_threshold;
        let stale = self.store.stale_orders(cutoff).await?;
        let mut outcome = ReconcileOutcome::default();
        let mut queried = 0u32;
        let mut failed = 0u32;

        for mut order in stale {
            queried += 1;
            let view = match tokio::time::timeout(
                self.config.exchange_timeout,
                self.exchange.query_order(&order.order_id),
            )
            .await
            {
                Ok(Ok(view)) => view,
                Ok(Err(err)) => {
                    warn!("OrderManager: Query for {} failed: {err}", order.order_id);
                    // A rejection is still an answer; only connectivity
                    // faults count toward the unreachable streak.
                    if err.is_transient() {
                        failed += 1;
                    }
                    continue;
                }
                Err(_) => {
                    warn!("OrderManager: Query for {} timed out", order.order_id);
                    failed += 1;
                    continue;
                }
            };

            // Adopt fills we never saw before judging status.
            if view.qty_filled > order.qty_filled {
                let increment = view.qty_filled - order.qty_filled;
                let price = view
                    .avg_fill_price
                    .or(order.avg_fill_price)
                    .unwrap_or(Decimal::ZERO);
                info!(
                    "OrderManager: Reconciliation adopting fill of {} on {}",
                    increment, order.order_id
                );
                outcome.adopted_fills.push(FillEvent {
                    order_id: order.order_id.clone(),
                    qty_increment: increment,
                    price,
                    ts: now,
                });
                continue;
            }

            match view.status {
                OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                    info!(
                        "OrderManager: Reconciliation adopting {} for {}",
                        view.status, order.order_id
                    );
                    order.status = view.status;
                    order.last_update_at = now;
                    self.store.update_order(&order).await?;
                    self.after_terminal_without_fill(&order, &mut outcome).await?;
                }
                OrderStatus::Filled => {
                    if order.status != OrderStatus::Filled {
                        order.status = OrderStatus::Filled;
                        order.last_update_at = now;
                        self.store.update_order(&order).await?;
                    }
                }
                OrderStatus::Pending | OrderStatus::Partial => {
                    // Resting stops are supposed to sit without progress;
                    // only working entries and exits go stale.
                    if order.intent == OrderIntent::StopLoss {
                        continue;
                    }
                    info!(
                        "OrderManager: Canceling stale order {} (no progress since {})",
                        order.order_id, order.last_update_at
                    );
                    let _ = tokio::time::timeout(
                        self.config.exchange_timeout,
                        self.exchange.cancel_order(&order.order_id),
                    )
                    .await;
                    order.status = OrderStatus::Canceled;
                    order.last_update_at = now;
                    self.store.update_order(&order).await?;
                    self.after_terminal_without_fill(&order, &mut outcome).await?;
                }
            }
        }

        if queried > 0 {
            if failed == queried {
                self.reconcile_failures += 1;
                if self.reconcile_failures >= self.config.reconcile_failure_limit {
                    let err = OrderError::ReconciliationTimeout {
                        ticks: self.reconcile_failures,
                        reason: "exchange unreachable".to_string(),
                    };
                    self.store
                        .record_incident("reconciliation_timeout", &err.to_string(), now)
                        .await?;
                    return Err(err);
                }
            } else {
                self.reconcile_failures = 0;
            }
        }

        self.protect_naked_positions(now).await?;
        Ok(outcome)
    }

    /// Bookkeeping when an order ends without (further) fills.
    async fn after_terminal_without_fill(
        &mut self,
        order: &Order,
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), OrderError> {
        match order.intent {
            OrderIntent::Entry => {
                if order.qty_filled == Decimal::ZERO
                    && self
                        .store
                        .get_position(&order.va_id, &order.symbol)
                        .await?
                        .is_none()
                {
                    outcome.released.push((order.va_id.clone(), order.symbol.clone()));
                }
            }
            OrderIntent::StopLoss => {
                if self.stops.get(&order.symbol) == Some(&order.order_id) {
                    self.stops.remove(&order.symbol);
                }
            }
            OrderIntent::ReduceOnlyExit => {
                self.closing.remove(&order.symbol);
                self.close_reasons.remove(&order.order_id);
            }
        }
        Ok(())
    }

    /// Backstop for mandatory protection: every open position either has a
    /// live stop, a close in flight, or gets one now. Re-attach is tried
    /// first; if the exchange refuses, the position is panic-closed.
    async fn protect_naked_positions(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        let positions: Vec<Position> = self.positions.values().cloned().collect();
        for position in positions {
            if self.closing.contains(&position.symbol) {
                continue;
            }
            if let Some(stop) = self
                .store
                .live_stop_for_position(&position.va_id, &position.symbol)
                .await?
            {
                self.stops.insert(position.symbol.clone(), stop.order_id);
                continue;
            }
            self.stops.remove(&position.symbol);

            let detail = format!(
                "{}/{} open x{} without a live stop",
                position.va_id, position.symbol, position.qty
            );
            warn!("OrderManager: Naked position detected: {detail}");
            self.store
                .record_incident("naked_position", &detail, now)
                .await?;

            let mut stop = Order::stop_loss(
                &Order::entry(
                    &position.va_id,
                    &position.symbol,
                    position.side,
                    position.qty,
                    position.stop_loss_price,
                    now,
                ),
                position.qty,
                now,
            );
            stop.linked_entry_id = None;
            self.attach_stop(stop, &position, now).await?;
        }
        Ok(())
    }

    /// Shutdown path: cancel every non-terminal order.
    pub async fn cancel_all_open(&mut self, now: DateTime<Utc>) -> Result<usize, OrderError> {
        let open = self.store.open_orders().await?;
        let count = open.len();
        for mut order in open {
            let _ = tokio::time::timeout(
                self.config.exchange_timeout,
                self.exchange.cancel_order(&order.order_id),
            )
            .await;
            order.status = OrderStatus::Canceled;
            order.last_update_at = now;
            self.store.update_order(&order).await?;
        }
        self.closing.clear();
        self.stops.clear();
        Ok(count)
    }

    /// Submit with the per-call timeout. Rejection marks the order
    /// terminal; transient faults leave it pending in an unknown state for
    /// reconciliation to resolve (never double-submitted).
    async fn submit_to_exchange(
        &self,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let spec = OrderSpec {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            intent: order.intent,
            qty: order.qty_requested,
            stop_price: if order.intent == OrderIntent::StopLoss {
                order.stop_loss_price
            } else {
                None
            },
        };
        match tokio::time::timeout(
            self.config.exchange_timeout,
            self.exchange.submit_order(&spec),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ExchangeError::Rejected(reason))) => {
                order.status = OrderStatus::Rejected;
                order.last_update_at = now;
                self.store.update_order(order).await?;
                Err(OrderError::ExchangeRejected {
                    order_id: order.order_id.clone(),
                    reason,
                })
            }
            Ok(Err(err)) => {
                warn!(
                    "OrderManager: Submit for {} hit transient fault ({err}); state unknown until reconciliation",
                    order.order_id
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    "OrderManager: Submit for {} timed out after {:?}; state unknown until reconciliation",
                    order.order_id, self.config.exchange_timeout
                );
                Ok(())
            }
        }
    }
}
