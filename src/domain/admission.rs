use chrono::{DateTime, Utc};
use std::fmt;

/// Typed reason a signal was refused before reaching the exchange.
///
/// These are observable outcomes, not errors: they are logged, counted,
/// and the signal is dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The VA already owns a different symbol.
    SymbolConflict { held: String },
    /// The VA is serving a consecutive-loss cooldown.
    InCooldown { until: DateTime<Utc> },
    /// Kill switch blocks all new entries.
    KillSwitchEngaged,
    /// The VA is at its open-position limit.
    Throttled { open: usize, max: usize },
    /// Signal arrived outside the configured trading window.
    OutsideTradingWindow,
    SpreadTooWide { spread_bps: f64, limit_bps: f64 },
    SlippageTooHigh { slippage_bps: f64, limit_bps: f64 },
    LatencyTooHigh { latency_ms: i64, limit_ms: i64 },
    /// Snapshot has a non-positive bid or a crossed book.
    InvalidMarket,
    /// Signal referenced a VA the engine does not manage.
    UnknownAccount,
}

impl RejectReason {
    /// Stable label for counters and dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::SymbolConflict { .. } => "symbol_conflict",
            RejectReason::InCooldown { .. } => "in_cooldown",
            RejectReason::KillSwitchEngaged => "kill_switch",
            RejectReason::Throttled { .. } => "throttled",
            RejectReason::OutsideTradingWindow => "outside_trading_window",
            RejectReason::SpreadTooWide { .. } => "spread_too_wide",
            RejectReason::SlippageTooHigh { .. } => "slippage_too_high",
            RejectReason::LatencyTooHigh { .. } => "latency_too_high",
            RejectReason::InvalidMarket => "invalid_market",
            RejectReason::UnknownAccount => "unknown_account",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SymbolConflict { held } => {
                write!(f, "VA already holds {held}")
            }
            RejectReason::InCooldown { until } => {
                write!(f, "VA in cooldown until {until}")
            }
            RejectReason::KillSwitchEngaged => write!(f, "kill switch engaged"),
            RejectReason::Throttled { open, max } => {
                write!(f, "open position limit reached ({open}/{max})")
            }
            RejectReason::OutsideTradingWindow => write!(f, "outside trading window"),
            RejectReason::SpreadTooWide { spread_bps, limit_bps } => {
                write!(f, "spread {spread_bps:.2} bps > limit {limit_bps:.2} bps")
            }
            RejectReason::SlippageTooHigh { slippage_bps, limit_bps } => {
                write!(f, "slippage {slippage_bps:.2} bps > limit {limit_bps:.2} bps")
            }
            RejectReason::LatencyTooHigh { latency_ms, limit_ms } => {
                write!(f, "latency {latency_ms} ms > limit {limit_ms} ms")
            }
            RejectReason::InvalidMarket => write!(f, "invalid market snapshot"),
            RejectReason::UnknownAccount => write!(f, "unknown virtual account"),
        }
    }
}

/// Outcome of an admission stage. Components return a value; nothing is
/// thrown for control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accept,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accept)
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Admission::Accept => None,
            Admission::Reject(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_helpers() {
        assert!(Admission::Accept.is_accepted());
        let rejected = Admission::Reject(RejectReason::KillSwitchEngaged);
        assert!(!rejected.is_accepted());
        assert_eq!(
            rejected.reject_reason(),
            Some(&RejectReason::KillSwitchEngaged)
        );
    }

    #[test]
    fn test_reason_formatting() {
        let reason = RejectReason::Throttled { open: 5, max: 5 };
        assert!(reason.to_string().contains("5/5"));
        assert_eq!(reason.label(), "throttled");

        let reason = RejectReason::SpreadTooWide {
            spread_bps: 19.98,
            limit_bps: 10.0,
        };
        assert!(reason.to_string().contains("19.98"));
    }
}
