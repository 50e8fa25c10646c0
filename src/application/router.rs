use crate::domain::admission::{Admission, RejectReason};
use crate::domain::position::Position;
use std::collections::HashMap;
use tracing::{debug, info};

/// First gate in the pipeline: one symbol per virtual account.
///
/// Holds only the in-memory reservation map, rehydrated from open
/// positions at startup. The global one-owner-per-symbol rule is enforced
/// by the store's unique index and re-checked before order placement;
/// this map just keeps a single VA from fragmenting across symbols
/// without a store roundtrip.
#[derive(Debug, Default)]
pub struct SignalRouter {
    reservations: HashMap<String, String>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rehydrate(&mut self, positions: &[Position]) {
        self.reservations.clear();
        for position in positions {
            self.reservations
                .insert(position.va_id.clone(), position.symbol.clone());
        }
        info!(
            "SignalRouter: Rehydrated {} reservation(s) from open positions",
            self.reservations.len()
        );
    }

    /// Admission check only; the reservation is committed via [`reserve`]
    /// once the order is actually placed, so downstream rejections leave
    /// no stale claim behind.
    ///
    /// [`reserve`]: SignalRouter::reserve
    pub fn route(&self, va_id: &str, symbol: &str) -> Admission {
        match self.reservations.get(va_id) {
            None => Admission::Accept,
            Some(held) if held == symbol => Admission::Accept,
            Some(held) => Admission::Reject(RejectReason::SymbolConflict { held: held.clone() }),
        }
    }

    pub fn reserve(&mut self, va_id: &str, symbol: &str) {
        self.reservations
            .insert(va_id.to_string(), symbol.to_string());
    }

    pub fn reserved_symbol(&self, va_id: &str) -> Option<&str> {
        self.reservations.get(va_id).map(String::as_str)
    }

    /// Invoked when a position reaches zero quantity, or when an entry
    /// dies unfilled. Idempotent; a reservation for a different symbol is
    /// left alone.
    pub fn release(&mut self, va_id: &str, symbol: &str) {
        if self.reservations.get(va_id).is_some_and(|held| held == symbol) {
            self.reservations.remove(va_id);
            debug!("SignalRouter: Released {symbol} for {va_id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::OrderSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conflict_on_second_symbol() {
        let mut router = SignalRouter::new();
        assert!(router.route("VA001", "AAPL").is_accepted());
        router.reserve("VA001", "AAPL");

        let outcome = router.route("VA001", "GOOGL");
        assert_eq!(
            outcome.reject_reason(),
            Some(&RejectReason::SymbolConflict {
                held: "AAPL".to_string()
            })
        );
        // Same symbol keeps flowing (adds to the position).
        assert!(router.route("VA001", "AAPL").is_accepted());
        // Other VAs are unaffected.
        assert!(router.route("VA002", "GOOGL").is_accepted());
    }

    #[test]
    fn test_release_is_idempotent_and_symbol_scoped() {
        let mut router = SignalRouter::new();
        router.reserve("VA001", "AAPL");

        router.release("VA001", "GOOGL");
        assert_eq!(router.reserved_symbol("VA001"), Some("AAPL"));

        router.release("VA001", "AAPL");
        router.release("VA001", "AAPL");
        assert_eq!(router.reserved_symbol("VA001"), None);
        assert!(router.route("VA001", "GOOGL").is_accepted());
    }

    #[test]
    fn test_rehydrate_from_positions() {
        let positions = vec![Position::open(
            "VA002",
            "TSLA",
            OrderSide::Buy,
            dec!(1),
            dec!(200),
            dec!(196),
            Utc::now(),
        )];
        let mut router = SignalRouter::new();
        router.rehydrate(&positions);

        assert!(matches!(
            router.route("VA002", "AAPL"),
            Admission::Reject(RejectReason::SymbolConflict { .. })
        ));
    }
}
