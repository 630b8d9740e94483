use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use eyre::{eyre, Result};
use futures_util::future::join_all;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::classifier::{price_breakdown, SaleClassifier};
use crate::config::Config;
use crate::dedup::{DedupGuard, DedupKey, InMemorySaleStore, SaleStore};
use crate::error::{RpcError, SaleError};
use crate::feed::SaleFeed;
use crate::metadata::{MetadataHttp, MetadataResolver};
use crate::models::{Currency, HealthStatus, SaleCandidate, SaleRecord, TransactionContext, TransferEvent, Trait};
use crate::parser;
use crate::receipt::{ReceiptFetcher, RetryPolicy};
use crate::rpc::ChainRpc;

/// Bulk sales only get images for their first few tokens
const MAX_BULK_IMAGES: usize = 4;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

/// What happened to one transfer notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    NotCandidate,
    NotASale,
    Duplicate,
    Emitted,
    Failed,
}

#[derive(Debug, Clone)]
struct SaleLinks {
    marketplace: String,
    item_url_template: String,
    tx_url_template: String,
    token_id_offset: u64,
}

#[derive(Debug, Clone)]
struct PollSettings {
    interval: Duration,
    confirmations: u64,
    max_block_range: u64,
    start_block: Option<u64>,
}

pub struct ChainListener<R, H, S = InMemorySaleStore> {
    rpc: Arc<R>,
    contract: Address,
    classifier: SaleClassifier,
    receipts: ReceiptFetcher,
    dedup: Arc<DedupGuard<S>>,
    metadata: MetadataResolver<R, H>,
    feed: SaleFeed,
    links: SaleLinks,
    poll: PollSettings,
    expected_chain_id: u64,
    last_block: AtomicU64,
}

impl<R, H, S> ChainListener<R, H, S>
where
    R: ChainRpc,
    H: MetadataHttp,
    S: SaleStore,
{
    pub fn new(
        cfg: &Config,
        rpc: Arc<R>,
        http: H,
        dedup: Arc<DedupGuard<S>>,
        feed: SaleFeed,
    ) -> Self {
        let metadata = MetadataResolver::new(
            Arc::clone(&rpc),
            http,
            cfg.ipfs_gateways.clone(),
            cfg.gateway_timeout,
        );

        Self {
            rpc,
            contract: cfg.contract_address,
            classifier: SaleClassifier::from_config(cfg),
            receipts: ReceiptFetcher::default(),
            dedup,
            metadata,
            feed,
            links: SaleLinks {
                marketplace: cfg.marketplace_name.clone(),
                item_url_template: cfg.item_url_template.clone(),
                tx_url_template: cfg.tx_url_template.clone(),
                token_id_offset: cfg.token_id_offset,
            },
            poll: PollSettings {
                interval: cfg.poll_interval,
                confirmations: cfg.confirmations,
                max_block_range: cfg.max_block_range,
                start_block: cfg.start_block,
            },
            expected_chain_id: cfg.expected_chain_id,
            last_block: AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.receipts = ReceiptFetcher::new(policy);
        self
    }

    pub fn last_polled_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub fn reserved_sales(&self) -> usize {
        self.dedup.reserved_count()
    }

    pub fn cached_metadata(&self) -> usize {
        self.metadata.cached_tokens()
    }

    /// Poll the contract's Transfer logs forever.
    ///
    /// Only the first block-number read is fatal; after that a failed round
    /// is logged and retried with a growing delay.
    pub async fn run(&self) -> Result<()> {
        let latest = self
            .rpc
            .block_number()
            .await
            .map_err(|e| eyre!("cannot reach RPC endpoint: {}", e))?;

        let mut cursor = match self.poll.start_block {
            Some(start) => start.saturating_sub(1),
            None => latest.saturating_sub(self.poll.confirmations),
        };
        self.last_block.store(cursor, Ordering::Relaxed);

        info!("Listening for sales on {} after block {}", self.contract, cursor);

        let mut retry_delay = self.poll.interval;
        loop {
            match self.poll_once(cursor).await {
                Ok(next) => {
                    cursor = next;
                    retry_delay = self.poll.interval; // reset after success
                }
                Err(e) => {
                    warn!("RPC failed this round: {}", e);
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
            }

            sleep(retry_delay).await;
        }
    }

    /// Process every new Transfer log after `cursor`; returns the new cursor
    pub async fn poll_once(&self, cursor: u64) -> Result<u64, RpcError> {
        let latest = self.rpc.block_number().await?;
        let target = latest.saturating_sub(self.poll.confirmations);
        if target <= cursor {
            return Ok(cursor);
        }
        let to_block = target.min(cursor.saturating_add(self.poll.max_block_range));

        let logs = self
            .rpc
            .get_transfer_logs(self.contract, cursor + 1, to_block)
            .await?;

        let events: Vec<TransferEvent> = logs
            .iter()
            .filter_map(|log| {
                let event = parser::decode_transfer(log);
                if event.is_none() {
                    warn!("Skipping malformed Transfer log in {:?}", log.tx_hash);
                }
                event
            })
            .collect();

        let emitted = self.process_batch(&events).await;
        self.last_block.store(to_block, Ordering::Relaxed);

        if events.is_empty() {
            debug!("Blocks {} → {}: no transfers", cursor + 1, to_block);
        } else {
            info!(
                "Blocks {} → {}: {} transfers, {} sales",
                cursor + 1,
                to_block,
                events.len(),
                emitted
            );
        }

        Ok(to_block)
    }

    /// Run a batch of notifications concurrently on the current task.
    /// Returns how many sales were published.
    pub async fn process_batch(&self, events: &[TransferEvent]) -> usize {
        join_all(events.iter().map(|event| self.handle_transfer(event)))
            .await
            .into_iter()
            .filter(|outcome| *outcome == TransferOutcome::Emitted)
            .count()
    }

    /// Pipeline boundary: errors are logged here and never escape
    pub async fn handle_transfer(&self, event: &TransferEvent) -> TransferOutcome {
        debug!(
            from = %event.from,
            to = %event.to,
            token_id = %event.token_id,
            tx = %format!("{:#x}", event.tx_hash),
            "Transfer event detected"
        );

        match self.process_transfer(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error processing sale {:#x}: {}", event.tx_hash, e);
                TransferOutcome::Failed
            }
        }
    }

    async fn process_transfer(&self, event: &TransferEvent) -> Result<TransferOutcome, SaleError> {
        let tx = self
            .receipts
            .fetch_transaction(self.rpc.as_ref(), event.tx_hash)
            .await?;

        if !self.classifier.is_sale_candidate(&tx) {
            return Ok(TransferOutcome::NotCandidate);
        }

        let receipt = self.receipts.fetch(self.rpc.as_ref(), event.tx_hash).await?;
        let ctx = TransactionContext { tx, receipt };

        let Some(candidate) = self.classifier.classify(event, &ctx) else {
            return Ok(TransferOutcome::NotASale);
        };

        let key = DedupKey::for_sale(&candidate);
        if !self.dedup.reserve(&key) {
            return Ok(TransferOutcome::Duplicate);
        }

        match self.publish_sale(&candidate).await {
            Ok(record) => {
                info!(
                    "💰 Sale {}: {} item(s) for {} {} ({} each) on {}",
                    record.transaction_hash,
                    record.transfer_count,
                    record.total_price,
                    record.currency.symbol(),
                    record.price_per_item,
                    record.marketplace
                );
                Ok(TransferOutcome::Emitted)
            }
            Err(e) => {
                // let a later notification retry this sale
                self.dedup.release(&key);
                Err(e)
            }
        }
    }

    async fn publish_sale(&self, candidate: &SaleCandidate) -> Result<SaleRecord, SaleError> {
        let pricing = price_breakdown(candidate)?;
        let token_id = candidate.primary_token();
        let tx_hash = format!("{:#x}", candidate.tx_hash);

        let image_urls = self.images_for(candidate).await;
        let traits = self.traits_for(candidate).await;

        let record = SaleRecord {
            token_id: token_id.to_string(),
            display_token_id: token_id
                .saturating_add(U256::from(self.links.token_id_offset))
                .to_string(),
            price_per_item: pricing.price_per_item,
            total_price: pricing.total_price,
            raw_price_wei: candidate.raw_price_wei.to_string(),
            currency: candidate.currency,
            transfer_count: candidate.transfer_count,
            is_bulk_sale: candidate.is_bulk(),
            is_wape_sale: candidate.currency == Currency::Wape,
            marketplace: self.links.marketplace.clone(),
            buyer: candidate.buyer.to_checksum(None),
            seller: candidate.seller.to_checksum(None),
            item_url: self
                .links
                .item_url_template
                .replace("{contract}", &self.contract.to_checksum(None))
                .replace("{tokenId}", &token_id.to_string()),
            tx_url: self.links.tx_url_template.replace("{txHash}", &tx_hash),
            transaction_hash: tx_hash,
            image_urls,
            traits,
        };

        self.feed.publish(record.clone())?;
        Ok(record)
    }

    async fn images_for(&self, candidate: &SaleCandidate) -> Vec<String> {
        let limit = if candidate.is_bulk() { MAX_BULK_IMAGES } else { 1 };
        if candidate.is_bulk() {
            debug!(
                "Bulk sale detected: {} total tokens, fetching images for first {}",
                candidate.transfer_count,
                limit.min(candidate.transfer_count)
            );
        }

        join_all(
            candidate
                .token_ids
                .iter()
                .take(limit)
                .map(|id| self.metadata.image_url(self.contract, *id)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    async fn traits_for(&self, candidate: &SaleCandidate) -> Vec<Trait> {
        if candidate.is_bulk() {
            return Vec::new();
        }
        self.metadata.traits(self.contract, candidate.primary_token()).await
    }

    pub async fn health_check(&self) -> HealthStatus {
        let block = self.rpc.block_number().await;
        let chain_id = self.rpc.chain_id().await;

        match (block, chain_id) {
            (Ok(block), Ok(chain_id)) => HealthStatus {
                status: "healthy".to_string(),
                last_block: Some(block),
                provider_connected: chain_id == self.expected_chain_id,
            },
            (block, chain_id) => {
                if let Err(e) = block {
                    error!("Health check failed: {}", e);
                }
                if let Err(e) = chain_id {
                    error!("Health check failed: {}", e);
                }
                HealthStatus {
                    status: "unhealthy".to_string(),
                    last_block: None,
                    provider_connected: false,
                }
            }
        }
    }
}
