//! Restart behavior: router reservations, governor state, and stop
//! protection all come back from the reopened database.

mod common;

use common::{Harness, signal, test_config};
use rust_decimal_macros::dec;
use tempfile::TempDir;
use vatrade::domain::repositories::TradeStore;
use vatrade::domain::types::{OrderIntent, OrderSide};
use vatrade::infrastructure::persistence::database::Database;

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}/vatrade.db", dir.path().display());

    let mut config = test_config();
    config.cooldown_duration_seconds = 3600;
    config.reconcile_interval_seconds = 1;

    // --- Session 1: open a position on VA001, run VA002 into cooldown ---
    {
        let database = Database::new(&url).await.unwrap();
        let harness = Harness::start_with_database(config.clone(), database).await;

        harness.open_position("VA001", "AAPL", dec!(10), dec!(100), 1).await;
        harness.wait_submission(OrderIntent::StopLoss, "AAPL", 1).await;

        for i in 1..=3 {
            harness.open_position("VA002", "TSLA", dec!(1), dec!(100), i).await;
            harness.wait_submission(OrderIntent::StopLoss, "TSLA", i).await;
            harness.stop_out("VA002", "TSLA", dec!(97), i).await;
            harness.wait_trades("VA002", i).await;
        }

        harness.stop().await;
    }

    // --- Session 2: reopen the same database ---
    let database = Database::new(&url).await.unwrap();
    let harness = Harness::start_with_database(config, database).await;

    // Position book survived.
    let position = harness
        .store
        .get_position("VA001", "AAPL")
        .await
        .unwrap()
        .expect("position survived restart");
    assert_eq!(position.qty, dec!(10));
    assert_eq!(position.stop_loss_price, dec!(98.00));

    // Account state survived: loss tally, drawdown from persisted peak,
    // and the still-running cooldown.
    let accounts = harness.store.load_accounts().await.unwrap();
    let va2 = accounts.iter().find(|a| a.va_id == "VA002").unwrap();
    assert_eq!(va2.losses, 3);
    assert_eq!(va2.balance, dec!(9991));
    assert_eq!(va2.peak_equity, dec!(10000));
    assert_eq!(va2.max_drawdown, dec!(9));
    assert!(va2.cooldown_until.is_some());

    // Shutdown canceled the resting stop; the first reconciliation pass of
    // the new session puts protection back on.
    let stop = harness.wait_submission(OrderIntent::StopLoss, "AAPL", 1).await;
    assert_eq!(stop.qty, dec!(10));

    // Router rehydrated: VA001 still owns AAPL, so another symbol is
    // refused.
    harness
        .push(signal("VA001", "GOOGL", OrderSide::Buy, dec!(5), dec!(50)))
        .await;
    harness.settle_idle().await;
    assert_eq!(harness.submission_count(OrderIntent::Entry, "GOOGL").await, 0);

    // Governor rehydrated: VA002 is still cooling down.
    harness
        .push(signal("VA002", "MSFT", OrderSide::Buy, dec!(1), dec!(50)))
        .await;
    harness.settle_idle().await;
    assert_eq!(harness.submission_count(OrderIntent::Entry, "MSFT").await, 0);

    // An untouched VA trades normally.
    harness
        .push(signal("VA003", "MSFT", OrderSide::Buy, dec!(1), dec!(50)))
        .await;
    harness.wait_submission(OrderIntent::Entry, "MSFT", 1).await;

    harness.stop().await;
}
