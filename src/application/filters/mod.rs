//! Pre-trade admission gates.
//!
//! Stateless checks evaluated in a fixed order; the first rejection
//! short-circuits and is reported with its typed reason. Thresholds come
//! from configuration; the gates themselves hold no mutable state.

pub mod latency;
pub mod slippage;
pub mod spread;
pub mod trading_window;

use crate::config::EngineConfig;
use crate::domain::admission::Admission;
use crate::domain::types::Signal;
use chrono::{DateTime, Utc};
use tracing::debug;

pub use latency::LatencyGate;
pub use slippage::SlippageGate;
pub use spread::SpreadGate;
pub use trading_window::TradingWindowGate;

/// Everything a gate may look at for one signal.
pub struct GateContext<'a> {
    pub signal: &'a Signal,
    pub now: DateTime<Utc>,
}

pub trait AdmissionGate: Send + Sync {
    /// Name used in logs and rejection accounting.
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &GateContext<'_>) -> Admission;
}

pub struct FilterChain {
    gates: Vec<Box<dyn AdmissionGate>>,
}

impl FilterChain {
    /// The canonical chain: trading window, spread, slippage, latency.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            gates: vec![
                Box::new(TradingWindowGate::new(
                    config.trading_window_start,
                    config.trading_window_end,
                    config.trading_window_utc_offset_minutes,
                )),
                Box::new(SpreadGate::new(config.max_spread_bps)),
                Box::new(SlippageGate::new(config.max_slippage_bps)),
                Box::new(LatencyGate::new(config.max_latency_ms)),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_gates(gates: Vec<Box<dyn AdmissionGate>>) -> Self {
        Self { gates }
    }

    pub fn evaluate(&self, ctx: &GateContext<'_>) -> Admission {
        for gate in &self.gates {
            if let Admission::Reject(reason) = gate.evaluate(ctx) {
                debug!(
                    "FilterChain: {} rejected {}/{}: {}",
                    gate.name(),
                    ctx.signal.va_id,
                    ctx.signal.symbol,
                    reason
                );
                return Admission::Reject(reason);
            }
        }
        Admission::Accept
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::types::{MarketSnapshot, OrderSide, Signal};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub fn snapshot(bid: Decimal, ask: Decimal, as_of: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            bid,
            ask,
            last: (bid + ask) / Decimal::TWO,
            as_of,
            source_latency_ms: 0,
        }
    }

    pub fn signal(now: DateTime<Utc>) -> Signal {
        Signal {
            va_id: "VA001".to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            desired_qty: dec!(10),
            expected_price: None,
            snapshot: snapshot(dec!(100.00), dec!(100.02), now),
            received_at: now,
        }
    }
}
