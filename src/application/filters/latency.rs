use crate::application::filters::{AdmissionGate, GateContext};
use crate::domain::admission::{Admission, RejectReason};

/// Rejects signals built on market data that is already too old: snapshot
/// age plus the source's own reported latency.
pub struct LatencyGate {
    max_latency_ms: f64,
}

impl LatencyGate {
    pub fn new(max_latency_ms: f64) -> Self {
        Self { max_latency_ms }
    }
}

impl AdmissionGate for LatencyGate {
    fn name(&self) -> &'static str {
        "LatencyGate"
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> Admission {
        let age_ms = (ctx.now - ctx.signal.snapshot.as_of).num_milliseconds();
        let latency_ms = age_ms.saturating_add(ctx.signal.snapshot.source_latency_ms);

        if latency_ms as f64 > self.max_latency_ms {
            Admission::Reject(RejectReason::LatencyTooHigh {
                latency_ms,
                limit_ms: self.max_latency_ms as i64,
            })
        } else {
            Admission::Accept
        }
    }
}
