//! Reference wiring of the tracker against a JSON-RPC endpoint.
//!
//! The store starts empty. An embedding application shares the same
//! `InMemoryTransactionStore` and calls `insert` for every transaction it signs, after
//! allocating its nonce through the `NonceManager` and before releasing the `NonceLock`.

use std::sync::Arc;

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use txtrack_core::{
    chain::RpcChain,
    config::{LogFormat, load_config},
    ledger::TransactionLedger,
};
use txtrack_executors::eoa::{
    BlockTrackerWorker, EventSink, InMemoryTransactionStore, NonceManager,
    PendingTransactionTracker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_path = std::env::current_dir()?;
    let config = load_config(&base_path.join("configuration"))?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "txtrack=debug,txtrack_executors=debug,txtrack_core=debug".into()),
    );

    match config.log_format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let chain = Arc::new(RpcChain::connect_http(
        config.rpc_url.parse()?,
        config.network_id.as_str(),
    ));
    let store = Arc::new(InMemoryTransactionStore::new(config.network_id.as_str()));
    let nonce_manager = Arc::new(NonceManager::new(chain.clone(), store.clone()));

    let (sink, events) = EventSink::channel();
    let tracker = Arc::new(PendingTransactionTracker::new(
        chain.clone(),
        store.clone(),
        nonce_manager,
        sink,
        config.retry_limit,
    ));

    let event_task = tokio::spawn(store.clone().apply_events(events));
    let worker = BlockTrackerWorker::new(chain, tracker, config.poll_interval()).spawn();

    tracing::info!(
        network_id = %config.network_id,
        retry_limit = config.retry_limit,
        tracked = store.pending_transactions(None).len(),
        "Tracker started, waiting for shutdown signal"
    );
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutdown signal received");
    if let Err(e) = worker.shutdown().await {
        tracing::error!("Error during shutdown: {}", e);
    }

    // The worker owned the last event sender.
    if let Err(e) = event_task.await {
        tracing::error!("Event task panicked: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
