// src/receipt.rs
use std::future::Future;
use std::time::Duration;

use alloy::primitives::B256;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{ReceiptFetchError, RetryError, RpcError, SaleError};
use crate::models::TransactionInfo;
use crate::rpc::{ChainRpc, Receipt};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before retry `n` is `n * base_delay`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut retries = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.base_delay * retries;
                    warn!(
                        "⚠️ {} failed (attempt {}): {}. Retrying in {:?}...",
                        what, retries, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) if e.is_retriable() => {
                    return Err(RetryError::Exhausted {
                        attempts: retries + 1,
                        last: e,
                    })
                }
                Err(e) => return Err(RetryError::Fatal(e)),
            }
        }
    }
}

/// Fetches transactions and their receipts, retrying provider-side failures.
/// A `null` answer is final: the hash came from a log the node already served.
#[derive(Debug, Clone, Default)]
pub struct ReceiptFetcher {
    policy: RetryPolicy,
}

impl ReceiptFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn fetch<R: ChainRpc>(
        &self,
        rpc: &R,
        tx_hash: B256,
    ) -> Result<Receipt, ReceiptFetchError> {
        let what = format!("Receipt request for {tx_hash:#x}");
        match self.policy.run(&what, move || rpc.get_transaction_receipt(tx_hash)).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err(ReceiptFetchError::NotFound(tx_hash)),
            Err(RetryError::Exhausted { attempts, last }) => Err(ReceiptFetchError::Exhausted {
                tx_hash,
                attempts,
                last,
            }),
            Err(RetryError::Fatal(e)) => Err(ReceiptFetchError::Rpc(e)),
        }
    }

    pub async fn fetch_transaction<R: ChainRpc>(
        &self,
        rpc: &R,
        tx_hash: B256,
    ) -> Result<TransactionInfo, SaleError> {
        let what = format!("Transaction lookup for {tx_hash:#x}");
        match self.policy.run(&what, move || rpc.get_transaction(tx_hash)).await {
            Ok(Some(tx)) => Ok(tx),
            Ok(None) => Err(SaleError::TransactionNotFound(tx_hash)),
            Err(RetryError::Exhausted { attempts, last }) => Err(SaleError::TransactionUnavailable {
                tx_hash,
                attempts,
                last,
            }),
            Err(RetryError::Fatal(e)) => Err(SaleError::Transaction(e)),
        }
    }
}
