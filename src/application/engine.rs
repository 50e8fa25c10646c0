//! The execution loop.
//!
//! One cooperative task multiplexes every engine activity: signal intake,
//! fill application, stop-loss monitoring, reconciliation, dashboard
//! refresh, and shutdown. The store serializes all durable state changes,
//! so the hard invariants never depend on cross-task interleaving.

use crate::application::dashboard::DashboardView;
use crate::application::filters::{FilterChain, GateContext};
use crate::application::governor::{Governor, GovernorConfig};
use crate::application::order_manager::{
    FillOutcome, OrderManager, OrderManagerConfig, Placement,
};
use crate::application::router::SignalRouter;
use crate::application::signal_queue::SignalQueue;
use crate::config::EngineConfig;
use crate::domain::account::VirtualAccount;
use crate::domain::admission::Admission;
use crate::domain::errors::OrderError;
use crate::domain::ports::ExchangeAdapter;
use crate::domain::repositories::TradeStore;
use crate::domain::types::{FillEvent, MarketTick, Signal};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Rejection and throughput accounting, surfaced on the dashboard.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineCounters {
    pub signals_accepted: u64,
    pub rejected_router: u64,
    pub rejected_governor: u64,
    pub rejected_filters: u64,
    pub rejected_orders: u64,
    pub signals_dropped: u64,
    pub fills_applied: u64,
    pub fills_ignored: u64,
    pub stop_triggers: u64,
    pub last_error: Option<String>,
}

pub struct ExecutionEngine {
    config: EngineConfig,
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn ExchangeAdapter>,
    router: SignalRouter,
    governor: Governor,
    filters: FilterChain,
    orders: OrderManager,
    dashboard: DashboardView,
    queue: Arc<SignalQueue>,
    counters: EngineCounters,
}

impl ExecutionEngine {
    /// Construct all services and rehydrate the in-memory caches from the
    /// store. Accounts are created from configuration on first run.
    pub async fn build(
        config: EngineConfig,
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn ExchangeAdapter>,
    ) -> Result<Self> {
        let mut accounts = store.load_accounts().await?;
        if accounts.is_empty() {
            for i in 0..config.va_count {
                let account =
                    VirtualAccount::new(format!("VA{:03}", i + 1), config.va_initial_balance);
                store.save_account(&account).await?;
                accounts.push(account);
            }
            info!(
                "ExecutionEngine: Bootstrapped {} virtual account(s) with balance {}",
                config.va_count, config.va_initial_balance
            );
        }

        let positions = store.open_positions().await?;
        let mut router = SignalRouter::new();
        router.rehydrate(&positions);

        let mut governor = Governor::new(GovernorConfig {
            loss_threshold: config.max_loss_cooldown,
            cooldown_duration: config.cooldown_duration(),
            max_open_positions: config.max_open_positions_per_va,
            global_kill_switch: config.kill_switch_enabled,
        });
        governor.rehydrate(accounts, &positions);

        let filters = FilterChain::from_config(&config);

        let mut orders = OrderManager::new(
            store.clone(),
            exchange.clone(),
            OrderManagerConfig {
                stop_loss_fraction: config.stop_loss_fraction(),
                exchange_timeout: config.exchange_timeout(),
                stale_order_threshold: config.stale_order_threshold(),
                stop_loss_failure_kill_threshold: config.stop_loss_failure_kill_threshold,
                reconcile_failure_limit: config.reconcile_failure_limit,
            },
        );
        orders.rehydrate().await?;

        let dashboard = DashboardView::new(store.clone());
        let queue = Arc::new(SignalQueue::new(config.signal_queue_capacity));

        Ok(Self {
            config,
            store,
            exchange,
            router,
            governor,
            filters,
            orders,
            dashboard,
            queue,
            counters: EngineCounters::default(),
        })
    }

    /// Producer-facing handle for the bounded signal intake.
    pub fn signal_queue(&self) -> Arc<SignalQueue> {
        self.queue.clone()
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Drive the loop until shutdown is signaled or a fatal fault occurs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let queue = self.queue.clone();
        let mut fills = self
            .exchange
            .fill_stream()
            .await
            .map_err(|err| anyhow::anyhow!("failed to open fill stream: {err}"))?;
        let mut ticks = self
            .exchange
            .market_stream()
            .await
            .map_err(|err| anyhow::anyhow!("failed to open market stream: {err}"))?;

        let mut reconcile_timer = tokio::time::interval(Duration::from_secs(
            self.config.reconcile_interval_seconds.max(1),
        ));
        reconcile_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dashboard_timer = tokio::time::interval(Duration::from_secs(
            self.config.dashboard_interval_seconds.max(1),
        ));
        dashboard_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "ExecutionEngine: Running (reconcile every {}s, dashboard every {}s)",
            self.config.reconcile_interval_seconds, self.config.dashboard_interval_seconds
        );

        let fatal = loop {
            tokio::select! {
                signal = queue.pop() => {
                    if let Err(err) = self.process_signal(signal).await {
                        break Some(err);
                    }
                }
                maybe_fill = fills.recv() => match maybe_fill {
                    Some(fill) => {
                        if let Err(err) = self.process_fill(fill, false).await {
                            break Some(err);
                        }
                    }
                    None => {
                        warn!("ExecutionEngine: Fill stream ended; exchange session lost");
                        break None;
                    }
                },
                maybe_tick = ticks.recv() => match maybe_tick {
                    Some(tick) => {
                        if let Err(err) = self.process_tick(tick).await {
                            break Some(err);
                        }
                    }
                    None => {
                        warn!("ExecutionEngine: Market stream ended; exchange session lost");
                        break None;
                    }
                },
                _ = reconcile_timer.tick() => {
                    if let Err(err) = self.run_reconcile().await {
                        break Some(err);
                    }
                }
                _ = dashboard_timer.tick() => {
                    self.push_dashboard().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ExecutionEngine: Shutdown requested");
                        break None;
                    }
                }
            }
        };

        match fatal {
            None => self.shutdown().await,
            Some(err) => self.halt(err).await,
        }
    }

    /// Router -> governor -> filters -> order manager, each stage logging
    /// its outcome. Signals whose side opposes an existing position are
    /// manual exits and bypass the entry-only gates (reduce-only is always
    /// allowed).
    async fn process_signal(&mut self, signal: Signal) -> Result<()> {
        let now = Utc::now();

        let is_exit = self
            .orders
            .position(&signal.symbol)
            .is_some_and(|p| p.va_id == signal.va_id && p.side == signal.side.opposite());
        if is_exit {
            match self.orders.place_exit(&signal, now).await {
                Ok(Placement::Placed(order)) => {
                    self.counters.signals_accepted += 1;
                    debug!("ExecutionEngine: Exit order {} accepted", order.order_id);
                }
                Ok(Placement::AlreadyClosing) => {
                    info!(
                        "ExecutionEngine: Exit for {}/{} skipped, close already in flight",
                        signal.va_id, signal.symbol
                    );
                }
                Ok(Placement::Conflict { owner }) => {
                    warn!(
                        "ExecutionEngine: Exit for {}/{} refused, owned by {owner}",
                        signal.va_id, signal.symbol
                    );
                    self.counters.rejected_router += 1;
                }
                Err(err) => self.note_order_error(err)?,
            }
            return Ok(());
        }

        if let Admission::Reject(reason) = self.router.route(&signal.va_id, &signal.symbol) {
            info!(
                "Router: Rejected {}/{}: {reason}",
                signal.va_id, signal.symbol
            );
            self.counters.rejected_router += 1;
            return Ok(());
        }
        if let Admission::Reject(reason) = self.governor.admit(&signal.va_id, now) {
            info!(
                "Governor: Rejected {}/{}: {reason}",
                signal.va_id, signal.symbol
            );
            self.counters.rejected_governor += 1;
            return Ok(());
        }
        let ctx = GateContext { signal: &signal, now };
        if let Admission::Reject(reason) = self.filters.evaluate(&ctx) {
            info!(
                "FilterChain: Rejected {}/{}: {reason}",
                signal.va_id, signal.symbol
            );
            self.counters.rejected_filters += 1;
            return Ok(());
        }

        match self.orders.place_entry(&signal, now).await {
            Ok(Placement::Placed(_)) => {
                // Commit the reservation only now, so filter and placement
                // rejections leave no stale claim.
                self.router.reserve(&signal.va_id, &signal.symbol);
                self.counters.signals_accepted += 1;
            }
            Ok(Placement::Conflict { owner }) => {
                info!(
                    "OrderManager: Rejected {}/{}: symbol owned by {owner}",
                    signal.va_id, signal.symbol
                );
                self.counters.rejected_router += 1;
            }
            Ok(Placement::AlreadyClosing) => {}
            Err(err) => self.note_order_error(err)?,
        }
        Ok(())
    }

    async fn process_fill(&mut self, fill: FillEvent, via_reconcile: bool) -> Result<()> {
        let now = Utc::now();
        match self
            .orders
            .handle_fill(fill, &self.governor, via_reconcile, now)
            .await
        {
            Ok(FillOutcome::Ignored { reason }) => {
                self.counters.fills_ignored += 1;
                debug!("ExecutionEngine: Fill ignored ({reason})");
            }
            Ok(FillOutcome::EntryFilled {
                order,
                position,
                opened,
                attach_failures,
            }) => {
                self.counters.fills_applied += 1;
                self.router.reserve(&order.va_id, &order.symbol);
                if opened {
                    self.governor.on_position_opened(&order.va_id);
                    info!(
                        "ExecutionEngine: Position opened {}/{} x{}",
                        position.va_id, position.symbol, position.qty
                    );
                }
                if attach_failures >= self.config.stop_loss_failure_kill_threshold {
                    self.engage_kill(&order.va_id).await?;
                }
            }
            Ok(FillOutcome::Reduced { position, .. }) => {
                self.counters.fills_applied += 1;
                debug!(
                    "ExecutionEngine: Position reduced {}/{} to {}",
                    position.va_id, position.symbol, position.qty
                );
            }
            Ok(FillOutcome::Closed { order, trade, account }) => {
                self.counters.fills_applied += 1;
                self.governor.install(account);
                self.governor.on_position_closed(&order.va_id);
                self.router.release(&order.va_id, &order.symbol);
                info!(
                    "ExecutionEngine: Trade settled {}/{} pnl {} ({})",
                    trade.va_id, trade.symbol, trade.realized_pnl, trade.reason
                );
            }
            Err(err) => self.note_order_error(err)?,
        }
        Ok(())
    }

    async fn process_tick(&mut self, tick: MarketTick) -> Result<()> {
        let now = Utc::now();
        match self.orders.on_market_tick(&tick, now).await {
            Ok(Some(close)) => {
                self.counters.stop_triggers += 1;
                info!(
                    "ExecutionEngine: Stop-loss close {} submitted for {}",
                    close.order_id, close.symbol
                );
            }
            Ok(None) => {}
            Err(err) => self.note_order_error(err)?,
        }
        Ok(())
    }

    async fn run_reconcile(&mut self) -> Result<()> {
        let now = Utc::now();
        match self.orders.reconcile(now).await {
            Ok(outcome) => {
                for (va_id, symbol) in outcome.released {
                    info!("ExecutionEngine: Releasing {symbol} for {va_id} (entry died unfilled)");
                    self.router.release(&va_id, &symbol);
                }
                for fill in outcome.adopted_fills {
                    self.process_fill(fill, true).await?;
                }
            }
            Err(err) => self.note_order_error(err)?,
        }
        Ok(())
    }

    /// Repeated stop-attach failures flip the VA's kill switch: entries
    /// stop, protective exits keep working.
    async fn engage_kill(&mut self, va_id: &str) -> Result<()> {
        let already = self
            .governor
            .account(va_id)
            .map(|account| account.kill_switch)
            .unwrap_or(true);
        if already {
            return Ok(());
        }
        if let Some(account) = self.governor.kill_account(va_id) {
            self.store.save_account(&account).await?;
            self.store
                .record_incident(
                    "kill_switch_engaged",
                    &format!("{va_id} after repeated stop-loss attach failures"),
                    Utc::now(),
                )
                .await?;
            error!("ExecutionEngine: Kill switch engaged for {va_id}");
            self.governor.install(account);
        }
        Ok(())
    }

    /// Non-fatal order errors are logged and counted; store faults
    /// propagate and halt the loop.
    fn note_order_error(&mut self, err: OrderError) -> Result<()> {
        match err {
            OrderError::Store(inner) => Err(inner.context("persistence store failure")),
            other => {
                warn!("ExecutionEngine: {other}");
                self.counters.rejected_orders += 1;
                self.counters.last_error = Some(other.to_string());
                Ok(())
            }
        }
    }

    async fn push_dashboard(&mut self) {
        let mut counters = self.counters.clone();
        counters.signals_dropped = self.queue.dropped();
        match self
            .dashboard
            .snapshot(&self.config, &counters, Utc::now())
            .await
        {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => info!("DASHBOARD_JSON:{json}"),
                Err(err) => warn!("ExecutionEngine: Failed to serialize dashboard: {err}"),
            },
            Err(err) => warn!("ExecutionEngine: Failed to build dashboard snapshot: {err}"),
        }
    }

    /// Cooperative shutdown: no new admissions, one final reconcile pass,
    /// cancel everything non-terminal, close the store last.
    async fn shutdown(mut self) -> Result<()> {
        info!("ExecutionEngine: Beginning graceful shutdown");
        if let Err(err) = self.run_reconcile().await {
            warn!("ExecutionEngine: Final reconcile pass failed: {err}");
        }
        match self.orders.cancel_all_open(Utc::now()).await {
            Ok(count) => info!("ExecutionEngine: Canceled {count} open order(s)"),
            Err(err) => error!("ExecutionEngine: Failed to cancel open orders: {err}"),
        }
        self.push_dashboard().await;
        self.store.close().await;
        info!("ExecutionEngine: Shutdown complete");
        Ok(())
    }

    /// Fatal fault path: best-effort cancel of open orders, then stop.
    async fn halt(mut self, err: anyhow::Error) -> Result<()> {
        error!("ExecutionEngine: Fatal fault, halting: {err:#}");
        if let Err(cancel_err) = self.orders.cancel_all_open(Utc::now()).await {
            error!("ExecutionEngine: Cancel-all during halt failed: {cancel_err}");
        }
        self.store.close().await;
        Err(err).context("execution loop halted")
    }
}
