//! End-to-end runs of the governance pipeline against the paper exchange.

mod common;

use common::{Harness, market, signal, test_config};
use rust_decimal_macros::dec;
use vatrade::domain::repositories::TradeStore;
use vatrade::domain::types::{CloseReason, OrderIntent, OrderSide, OrderStatus};

#[tokio::test]
async fn test_one_symbol_per_va() {
    let harness = Harness::start(test_config()).await;

    harness.open_position("VA001", "AAPL", dec!(10), dec!(100), 1).await;

    // Second symbol for the same VA must not produce any order.
    harness
        .push(signal("VA001", "GOOGL", OrderSide::Buy, dec!(5), dec!(50)))
        .await;
    harness.settle_idle().await;
    assert_eq!(harness.submission_count(OrderIntent::Entry, "GOOGL").await, 0);
    assert!(harness.store.symbol_owner("GOOGL").await.unwrap().is_none());

    // A different VA is free to take the other symbol.
    harness
        .push(signal("VA002", "GOOGL", OrderSide::Buy, dec!(5), dec!(50)))
        .await;
    harness.wait_submission(OrderIntent::Entry, "GOOGL", 1).await;

    harness.stop().await;
}

#[tokio::test]
async fn test_stop_loss_attachment() {
    let harness = Harness::start(test_config()).await;

    harness.open_position("VA001", "AAPL", dec!(10), dec!(100), 1).await;

    let stop_spec = harness.wait_submission(OrderIntent::StopLoss, "AAPL", 1).await;
    assert_eq!(stop_spec.side, OrderSide::Sell);
    assert_eq!(stop_spec.qty, dec!(10));
    assert_eq!(stop_spec.stop_price, Some(dec!(98.00)));

    let stop = harness
        .store
        .live_stop_for_position("VA001", "AAPL")
        .await
        .unwrap()
        .expect("live stop order persisted");
    assert_eq!(stop.stop_loss_price, Some(dec!(98.00)));
    assert!(stop.linked_entry_id.is_some());
    assert_eq!(stop.status, OrderStatus::Pending);

    harness.stop().await;
}

#[tokio::test]
async fn test_spread_rejection() {
    let harness = Harness::start(test_config()).await;

    // bid 100.00 / ask 100.20 is ~20 bps against a 10 bps ceiling.
    let mut wide = signal("VA001", "AAPL", OrderSide::Buy, dec!(10), dec!(100.10));
    wide.snapshot = market(dec!(100.10));
    wide.snapshot.bid = dec!(100.00);
    wide.snapshot.ask = dec!(100.20);
    harness.push(wide).await;
    harness.settle_idle().await;

    assert!(harness.exchange.submissions().await.is_empty());
    assert!(harness.store.get_position("VA001", "AAPL").await.unwrap().is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_stop_loss_trigger_closes_and_releases() {
    let harness = Harness::start(test_config()).await;

    harness.open_position("VA001", "AAPL", dec!(10), dec!(100), 1).await;
    harness.wait_submission(OrderIntent::StopLoss, "AAPL", 1).await;

    // Price crosses the 98.00 stop.
    harness.stop_out("VA001", "AAPL", dec!(97.95), 1).await;

    let trades = harness.wait_trades("VA001", 1).await;
    assert_eq!(trades[0].reason, CloseReason::StopLoss);
    assert_eq!(trades[0].qty, dec!(10));
    assert_eq!(trades[0].realized_pnl, dec!(-20.50));

    let accounts = harness.store.load_accounts().await.unwrap();
    let va1 = accounts.iter().find(|a| a.va_id == "VA001").unwrap();
    assert_eq!(va1.realized_pnl, dec!(-20.50));
    assert_eq!(va1.balance, dec!(9979.50));

    // Symbol released: the VA can trade something else again.
    harness
        .push(signal("VA001", "GOOGL", OrderSide::Buy, dec!(5), dec!(50)))
        .await;
    harness.wait_submission(OrderIntent::Entry, "GOOGL", 1).await;

    harness.stop().await;
}

#[tokio::test]
async fn test_partial_fill_accounting_and_stop_resync() {
    let harness = Harness::start(test_config()).await;

    harness
        .push(signal("VA001", "AAPL", OrderSide::Buy, dec!(10), dec!(100)))
        .await;
    let entry = harness.wait_submission(OrderIntent::Entry, "AAPL", 1).await;

    harness.exchange.fill_order(&entry.order_id, dec!(4), dec!(100)).await;
    let position = harness.wait_position_qty("VA001", "AAPL", dec!(4)).await;
    assert_eq!(position.avg_entry_price, dec!(100));
    let first_stop = harness.wait_submission(OrderIntent::StopLoss, "AAPL", 1).await;
    assert_eq!(first_stop.qty, dec!(4));

    harness.exchange.fill_order(&entry.order_id, dec!(6), dec!(101)).await;
    let position = harness.wait_position_qty("VA001", "AAPL", dec!(10)).await;
    assert_eq!(position.avg_entry_price, dec!(100.6));

    // The stop is re-submitted with the cumulative quantity.
    let resized = harness.wait_submission(OrderIntent::StopLoss, "AAPL", 2).await;
    assert_eq!(resized.order_id, first_stop.order_id);
    assert_eq!(resized.qty, dec!(10));

    let entry_order = harness.store.get_order(&entry.order_id).await.unwrap().unwrap();
    assert_eq!(entry_order.status, OrderStatus::Filled);
    assert_eq!(entry_order.avg_fill_price, Some(dec!(100.6)));

    harness.stop().await;
}

#[tokio::test]
async fn test_cooldown_engages_and_expires() {
    let mut config = test_config();
    config.cooldown_duration_seconds = 2;
    let harness = Harness::start(config).await;

    // Three consecutive stop-outs on VA002.
    for i in 1..=3 {
        harness.open_position("VA002", "TSLA", dec!(1), dec!(100), i).await;
        harness.wait_submission(OrderIntent::StopLoss, "TSLA", i).await;
        harness.stop_out("VA002", "TSLA", dec!(97), i).await;
        harness.wait_trades("VA002", i).await;
    }

    let accounts = harness.store.load_accounts().await.unwrap();
    let va2 = accounts.iter().find(|a| a.va_id == "VA002").unwrap();
    assert!(va2.cooldown_until.is_some(), "cooldown engaged after third loss");
    assert_eq!(va2.losses, 3);

    // A signal during cooldown is rejected before any order exists.
    harness
        .push(signal("VA002", "TSLA", OrderSide::Buy, dec!(1), dec!(100)))
        .await;
    harness.settle_idle().await;
    assert_eq!(harness.submission_count(OrderIntent::Entry, "TSLA").await, 3);

    // After expiry the identical signal is accepted and the streak is
    // clear.
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    harness
        .push(signal("VA002", "TSLA", OrderSide::Buy, dec!(1), dec!(100)))
        .await;
    harness.wait_submission(OrderIntent::Entry, "TSLA", 4).await;

    let accounts = harness.store.load_accounts().await.unwrap();
    let va2 = accounts.iter().find(|a| a.va_id == "VA002").unwrap();
    assert_eq!(va2.consecutive_losses, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_global_kill_switch_blocks_entries() {
    let mut config = test_config();
    config.kill_switch_enabled = true;
    let harness = Harness::start(config).await;

    harness
        .push(signal("VA001", "AAPL", OrderSide::Buy, dec!(10), dec!(100)))
        .await;
    harness.settle_idle().await;
    assert!(harness.exchange.submissions().await.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_manual_exit_closes_position() {
    let harness = Harness::start(test_config()).await;

    harness.open_position("VA001", "AAPL", dec!(10), dec!(100), 1).await;

    // Opposite-side signal on the held symbol is a manual exit.
    harness
        .push(signal("VA001", "AAPL", OrderSide::Sell, dec!(10), dec!(101)))
        .await;
    let close = harness
        .wait_submission(OrderIntent::ReduceOnlyExit, "AAPL", 1)
        .await;
    assert_eq!(close.qty, dec!(10));
    harness.exchange.fill_order(&close.order_id, dec!(10), dec!(101)).await;
    harness.wait_position_gone("VA001", "AAPL").await;

    let trades = harness.wait_trades("VA001", 1).await;
    assert_eq!(trades[0].reason, CloseReason::ManualExit);
    assert_eq!(trades[0].realized_pnl, dec!(10));

    harness.stop().await;
}
