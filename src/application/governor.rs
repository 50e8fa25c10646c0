use crate::domain::account::VirtualAccount;
use crate::domain::admission::{Admission, RejectReason};
use crate::domain::position::Position;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Consecutive losses before a cooldown engages.
    pub loss_threshold: u32,
    pub cooldown_duration: Duration,
    pub max_open_positions: usize,
    /// Operator flag blocking every new entry regardless of VA state.
    pub global_kill_switch: bool,
}

/// Per-VA rate and damage control: ACTIVE <-> COOLDOWN state machine,
/// open-position throttle, trade accounting.
///
/// The account cache is write-through: [`settle_trade`] and
/// [`kill_account`] hand back an updated clone for the caller to persist;
/// [`install`] commits it into the cache only after the store accepted it.
///
/// [`settle_trade`]: Governor::settle_trade
/// [`kill_account`]: Governor::kill_account
/// [`install`]: Governor::install
pub struct Governor {
    config: GovernorConfig,
    accounts: HashMap<String, VirtualAccount>,
    open_positions: HashMap<String, usize>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            accounts: HashMap::new(),
            open_positions: HashMap::new(),
        }
    }

    pub fn rehydrate(&mut self, accounts: Vec<VirtualAccount>, positions: &[Position]) {
        self.accounts = accounts
            .into_iter()
            .map(|account| (account.va_id.clone(), account))
            .collect();
        self.open_positions.clear();
        for position in positions {
            *self.open_positions.entry(position.va_id.clone()).or_insert(0) += 1;
        }
        info!(
            "Governor: Rehydrated {} account(s), {} with open positions",
            self.accounts.len(),
            self.open_positions.len()
        );
    }

    /// Admission for a new entry. Check order is fixed: kill switch, then
    /// cooldown, then throttle.
    pub fn admit(&self, va_id: &str, now: DateTime<Utc>) -> Admission {
        let Some(account) = self.accounts.get(va_id) else {
            return Admission::Reject(RejectReason::UnknownAccount);
        };

        if self.config.global_kill_switch || account.kill_switch {
            return Admission::Reject(RejectReason::KillSwitchEngaged);
        }
        if let Some(until) = account.cooldown_until
            && until > now
        {
            return Admission::Reject(RejectReason::InCooldown { until });
        }
        let open = self.open_position_count(va_id);
        if open >= self.config.max_open_positions {
            return Admission::Reject(RejectReason::Throttled {
                open,
                max: self.config.max_open_positions,
            });
        }
        Admission::Accept
    }

    pub fn account(&self, va_id: &str) -> Option<&VirtualAccount> {
        self.accounts.get(va_id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &VirtualAccount> {
        self.accounts.values()
    }

    pub fn open_position_count(&self, va_id: &str) -> usize {
        self.open_positions.get(va_id).copied().unwrap_or(0)
    }

    /// Fold a settled trade into a clone of the cached account and return
    /// it for persistence. The cache itself is untouched until
    /// [`install`](Governor::install).
    pub fn settle_trade(
        &self,
        va_id: &str,
        realized_pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Option<VirtualAccount> {
        let mut account = self.accounts.get(va_id)?.clone();
        account.record_trade(
            realized_pnl,
            now,
            self.config.loss_threshold,
            self.config.cooldown_duration,
        );
        if account.in_cooldown(now) && !self.accounts[va_id].in_cooldown(now) {
            warn!(
                "Governor: {va_id} entered cooldown until {} after a run of losses",
                account.cooldown_until.expect("cooldown set")
            );
        }
        Some(account)
    }

    /// Clone of the account with its kill switch engaged, for persistence.
    pub fn kill_account(&self, va_id: &str) -> Option<VirtualAccount> {
        let mut account = self.accounts.get(va_id)?.clone();
        account.kill_switch = true;
        Some(account)
    }

    /// Commit a persisted account into the cache.
    pub fn install(&mut self, account: VirtualAccount) {
        self.accounts.insert(account.va_id.clone(), account);
    }

    pub fn on_position_opened(&mut self, va_id: &str) {
        *self.open_positions.entry(va_id.to_string()).or_insert(0) += 1;
    }

    pub fn on_position_closed(&mut self, va_id: &str) {
        if let Some(count) = self.open_positions.get_mut(va_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.open_positions.remove(va_id);
            }
        }
    }
}
