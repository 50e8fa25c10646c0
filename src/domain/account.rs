use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An isolated risk and accounting unit sharing the real exchange
/// connection. Created at startup, mutated only through the store by the
/// governor and order manager paths, never destroyed during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub va_id: String,
    /// Running cash. Realized PnL is folded in as trades settle.
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_losses: u32,
    /// Highest balance reached. Persisted so drawdown survives restart.
    pub peak_equity: Decimal,
    /// Largest peak-to-balance fall observed, clamped at zero.
    pub max_drawdown: Decimal,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub kill_switch: bool,
}

impl VirtualAccount {
    pub fn new(va_id: impl Into<String>, initial_balance: Decimal) -> Self {
        Self {
            va_id: va_id.into(),
            balance: initial_balance,
            realized_pnl: Decimal::ZERO,
            wins: 0,
            losses: 0,
            consecutive_losses: 0,
            peak_equity: initial_balance,
            max_drawdown: Decimal::ZERO,
            cooldown_until: None,
            kill_switch: false,
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if until > now)
    }

    /// Fold a settled trade into the account.
    ///
    /// The loss streak resets to zero the moment a cooldown engages, so
    /// `consecutive_losses >= threshold` can never be observed alongside an
    /// expired cooldown. A win recorded during an active cooldown resets
    /// the streak but leaves the cooldown to run to its expiry.
    pub fn record_trade(
        &mut self,
        pnl: Decimal,
        now: DateTime<Utc>,
        loss_threshold: u32,
        cooldown_duration: Duration,
    ) {
        if let Some(until) = self.cooldown_until
            && until <= now
        {
            self.cooldown_until = None;
        }

        self.balance += pnl;
        self.realized_pnl += pnl;

        if pnl < Decimal::ZERO {
            self.losses += 1;
            self.consecutive_losses += 1;
        } else {
            self.wins += 1;
            self.consecutive_losses = 0;
        }

        if self.balance > self.peak_equity {
            self.peak_equity = self.balance;
        }
        let drawdown = (self.peak_equity - self.balance).max(Decimal::ZERO);
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }

        if loss_threshold > 0 && self.consecutive_losses >= loss_threshold {
            self.cooldown_until = Some(now + cooldown_duration);
            self.consecutive_losses = 0;
        }
    }
}
