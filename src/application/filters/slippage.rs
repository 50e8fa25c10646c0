use crate::application::filters::{AdmissionGate, GateContext};
use crate::domain::admission::{Admission, RejectReason};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Rejects signals whose expected price has drifted too far from the
/// snapshot's last trade. Signals without an expected price skip the
/// check; the simulated signal path does not always populate it.
pub struct SlippageGate {
    max_slippage_bps: f64,
}

impl SlippageGate {
    pub fn new(max_slippage_bps: f64) -> Self {
        Self { max_slippage_bps }
    }
}

impl AdmissionGate for SlippageGate {
    fn name(&self) -> &'static str {
        "SlippageGate"
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> Admission {
        let Some(expected) = ctx.signal.expected_price else {
            return Admission::Accept;
        };
        let reference = ctx.signal.snapshot.last;
        if reference <= Decimal::ZERO {
            return Admission::Reject(RejectReason::InvalidMarket);
        }

        let slippage_bps = ((expected - reference).abs() / reference * Decimal::from(10_000))
            .to_f64()
            .unwrap_or(f64::MAX);

        if slippage_bps > self.max_slippage_bps {
            Admission::Reject(RejectReason::SlippageTooHigh {
                slippage_bps,
                limit_bps: self.max_slippage_bps,
            })
        } else {
            Admission::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::filters::test_support::signal;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_skipped_without_expected_price() {
        let gate = SlippageGate::new(5.0);
        let now = Utc::now();
        let sig = signal(now);
        assert!(sig.expected_price.is_none());
        assert!(gate.evaluate(&GateContext { signal: &sig, now }).is_accepted());
    }

    #[test]
    fn test_drift_beyond_limit_rejected() {
        let gate = SlippageGate::new(5.0);
        let now = Utc::now();
        let mut sig = signal(now);
        // last = 100.01; expected 100.11 is ~10 bps away.
        sig.expected_price = Some(dec!(100.11));

        match gate.evaluate(&GateContext { signal: &sig, now }) {
            Admission::Reject(RejectReason::SlippageTooHigh { slippage_bps, .. }) => {
                assert!(slippage_bps > 5.0);
            }
            other => panic!("expected SlippageTooHigh, got {other:?}"),
        }
    }

    #[test]
    fn test_small_drift_accepted() {
        let gate = SlippageGate::new(5.0);
        let now = Utc::now();
        let mut sig = signal(now);
        sig.expected_price = Some(dec!(100.02));

        assert!(gate.evaluate(&GateContext { signal: &sig, now }).is_accepted());
    }
}
