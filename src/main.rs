mod api;
mod classifier;
mod config;
mod dedup;
mod error;
mod feed;
mod listener;
mod metadata;
mod models;
mod parser;
mod receipt;
mod rpc;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::dedup::DedupGuard;
use crate::feed::SaleFeed;
use crate::listener::ChainListener;
use crate::metadata::HttpMetadataClient;
use crate::rpc::RpcClient;

const RPC_TIMEOUT: Duration = Duration::from_secs(15);
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);
const FEED_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // RUST_LOG wins; otherwise DEBUG_MODE picks the default level
    let default_level = if config::debug_mode() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Sales watcher starting...");

    let cfg = config::load()?;
    info!("Loaded config:");
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Contract: {}", cfg.contract_address);
    info!("  Marketplaces: {:?}", cfg.marketplace_addresses);
    info!("  Bid acceptance: {}", cfg.bid_acceptance_address);
    info!("  Gateways: {:?}", cfg.ipfs_gateways);
    info!("  Port: {}", cfg.port);
    info!("  Debug mode: {}", cfg.debug_mode);

    let rpc = Arc::new(RpcClient::new(&cfg.rpc_http_url, RPC_TIMEOUT)?);
    let http = HttpMetadataClient::new(METADATA_TIMEOUT)?;
    let dedup = Arc::new(DedupGuard::default());
    let feed = SaleFeed::new(FEED_CAPACITY);

    // Stand-in for the Discord/Twitter formatters: one line per sale
    let mut sales = feed.subscribe();
    let consumer_handle = tokio::spawn(async move {
        loop {
            match sales.recv().await {
                Ok(sale) => info!(
                    "📣 {} #{} x{} for {} {} ({}) → {}",
                    sale.marketplace,
                    sale.display_token_id,
                    sale.transfer_count,
                    sale.total_price,
                    sale.currency.symbol(),
                    sale.tx_url,
                    sale.item_url
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Sale consumer lagged, {} sales skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let listener = Arc::new(ChainListener::new(&cfg, Arc::clone(&rpc), http, dedup, feed));
    info!("Initialized sales monitor on {}", rpc.url());

    // Spawn API task
    let api_handle = tokio::spawn({
        let listener = Arc::clone(&listener);
        let port = cfg.port;
        async move { api::serve(port, listener).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = listener.run() => match res {
            Ok(_) => info!("Listener exited cleanly"),
            Err(e) => {
                error!("Listener error: {:?}", e);
                return Err(e);
            }
        },
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    consumer_handle.abort();
    info!("Sales watcher stopped.");
    Ok(())
}
