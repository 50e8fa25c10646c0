//! vatrade server - headless signal-to-fill execution engine
//!
//! Runs the governance pipeline over a population of virtual accounts
//! against a paper exchange adapter. Signal producers push into the
//! engine's bounded queue; this binary wires no producer of its own.
//!
//! # Usage
//! ```sh
//! DATABASE_URL=sqlite://data/vatrade.db cargo run
//! ```
//!
//! The dashboard snapshot is pushed to stdout as one JSON line per
//! interval with the prefix `DASHBOARD_JSON:`, suitable for any log
//! aggregator.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use vatrade::application::engine::ExecutionEngine;
use vatrade::config::EngineConfig;
use vatrade::infrastructure::mock::MockExchange;
use vatrade::infrastructure::persistence::database::Database;
use vatrade::infrastructure::persistence::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("vatrade {} starting...", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load()?;
    info!(
        "Configuration loaded: {} VA(s), reconcile every {}s, stop-loss {}%",
        config.va_count, config.reconcile_interval_seconds, config.stop_loss_percentage
    );

    let database = Database::new(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(database));
    let exchange = Arc::new(MockExchange::new());
    info!("Exchange adapter: paper (mock)");

    let engine = ExecutionEngine::build(config, store, exchange).await?;
    let _queue = engine.signal_queue();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!("Engine running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(true);

    engine_task.await??;
    Ok(())
}
