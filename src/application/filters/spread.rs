use crate::application::filters::{AdmissionGate, GateContext};
use crate::domain::admission::{Admission, RejectReason};
use rust_decimal::prelude::ToPrimitive;

/// Rejects signals whose quoted spread exceeds the configured ceiling.
/// Requires a usable book (`bid > 0`, not crossed); anything else is
/// `InvalidMarket`.
pub struct SpreadGate {
    max_spread_bps: f64,
}

impl SpreadGate {
    pub fn new(max_spread_bps: f64) -> Self {
        Self { max_spread_bps }
    }
}

impl AdmissionGate for SpreadGate {
    fn name(&self) -> &'static str {
        "SpreadGate"
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> Admission {
        let Some(spread_bps) = ctx.signal.snapshot.spread_bps() else {
            return Admission::Reject(RejectReason::InvalidMarket);
        };
        let spread_bps = spread_bps.to_f64().unwrap_or(f64::MAX);

        if spread_bps > self.max_spread_bps {
            Admission::Reject(RejectReason::SpreadTooWide {
                spread_bps,
                limit_bps: self.max_spread_bps,
            })
        } else {
            Admission::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::filters::test_support::{signal, snapshot};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wide_spread_rejected() {
        let gate = SpreadGate::new(10.0);
        let now = Utc::now();
        let mut sig = signal(now);
        // bid 100.00 / ask 100.20: mid 100.10, spread ~19.98 bps.
        sig.snapshot = snapshot(dec!(100.00), dec!(100.20), now);

        match gate.evaluate(&GateContext { signal: &sig, now }) {
            Admission::Reject(RejectReason::SpreadTooWide { spread_bps, limit_bps }) => {
                assert!((spread_bps - 19.98).abs() < 0.05);
                assert_eq!(limit_bps, 10.0);
            }
            other => panic!("expected SpreadTooWide, got {other:?}"),
        }
    }

    #[test]
    fn test_tight_spread_accepted() {
        let gate = SpreadGate::new(10.0);
        let now = Utc::now();
        let mut sig = signal(now);
        // ~2 bps spread.
        sig.snapshot = snapshot(dec!(100.00), dec!(100.02), now);

        assert!(gate.evaluate(&GateContext { signal: &sig, now }).is_accepted());
    }

    #[test]
    fn test_crossed_book_is_invalid_market() {
        let gate = SpreadGate::new(10.0);
        let now = Utc::now();
        let mut sig = signal(now);
        sig.snapshot = snapshot(dec!(100.10), dec!(100.00), now);

        assert_eq!(
            gate.evaluate(&GateContext { signal: &sig, now }).reject_reason(),
            Some(&RejectReason::InvalidMarket)
        );
    }
}
