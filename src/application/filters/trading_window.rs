use crate::application::filters::{AdmissionGate, GateContext};
use crate::domain::admission::{Admission, RejectReason};
use chrono::{FixedOffset, NaiveTime};

/// Rejects signals arriving outside the configured local-time window.
///
/// Bounds are inclusive and compared in the configured fixed UTC offset.
/// A window whose start is after its end spans midnight. Leaving either
/// bound unset disables the gate.
pub struct TradingWindowGate {
    window: Option<(NaiveTime, NaiveTime)>,
    offset: FixedOffset,
}

impl TradingWindowGate {
    pub fn new(start: Option<NaiveTime>, end: Option<NaiveTime>, utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            window: start.zip(end),
            offset,
        }
    }
}

impl AdmissionGate for TradingWindowGate {
    fn name(&self) -> &'static str {
        "TradingWindowGate"
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> Admission {
        let Some((start, end)) = self.window else {
            return Admission::Accept;
        };

        let local = ctx.now.with_timezone(&self.offset).time();
        let inside = if start <= end {
            local >= start && local <= end
        } else {
            local >= start || local <= end
        };

        if inside {
            Admission::Accept
        } else {
            Admission::Reject(RejectReason::OutsideTradingWindow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::filters::test_support::signal;
    use chrono::{TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn evaluate(gate: &TradingWindowGate, now: chrono::DateTime<Utc>) -> Admission {
        let signal = signal(now);
        gate.evaluate(&GateContext { signal: &signal, now })
    }

    #[test]
    fn test_inside_and_outside_window() {
        let gate = TradingWindowGate::new(
            NaiveTime::from_hms_opt(9, 30, 0),
            NaiveTime::from_hms_opt(16, 0, 0),
            0,
        );

        assert!(evaluate(&gate, at(12, 0)).is_accepted());
        assert!(evaluate(&gate, at(9, 30)).is_accepted());
        assert!(evaluate(&gate, at(16, 0)).is_accepted());
        assert_eq!(
            evaluate(&gate, at(8, 0)).reject_reason(),
            Some(&RejectReason::OutsideTradingWindow)
        );
        assert_eq!(
            evaluate(&gate, at(20, 30)).reject_reason(),
            Some(&RejectReason::OutsideTradingWindow)
        );
    }

    #[test]
    fn test_unset_window_always_open() {
        let gate = TradingWindowGate::new(None, NaiveTime::from_hms_opt(16, 0, 0), 0);
        assert!(evaluate(&gate, at(3, 0)).is_accepted());
    }

    #[test]
    fn test_offset_shifts_the_window() {
        // 09:30-16:00 at UTC+2: 07:00 UTC is 09:00 local and rejected,
        // 08:00 UTC is 10:00 local and accepted.
        let gate = TradingWindowGate::new(
            NaiveTime::from_hms_opt(9, 30, 0),
            NaiveTime::from_hms_opt(16, 0, 0),
            120,
        );
        assert!(!evaluate(&gate, at(7, 0)).is_accepted());
        assert!(evaluate(&gate, at(8, 0)).is_accepted());
    }

    #[test]
    fn test_overnight_window_spans_midnight() {
        let gate = TradingWindowGate::new(
            NaiveTime::from_hms_opt(22, 0, 0),
            NaiveTime::from_hms_opt(2, 0, 0),
            0,
        );
        assert!(evaluate(&gate, at(23, 0)).is_accepted());
        assert!(evaluate(&gate, at(1, 0)).is_accepted());
        assert!(!evaluate(&gate, at(12, 0)).is_accepted());
    }
}
