// src/models.rs
use alloy::primitives::{Address, B256, U256};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::rpc::Receipt;

/// One ERC-721 `Transfer` log emitted by the watched contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub tx_hash: B256,
}

/// The parts of a transaction the sale heuristics look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub to: Option<Address>,
    pub value: U256,
}

/// Transaction plus receipt, fetched for a single sale candidate
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub tx: TransactionInfo,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Native chain currency, paid as transaction value
    Ape,
    /// Wrapped ERC-20, paid through a bid acceptance
    Wape,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Ape => "APE",
            Currency::Wape => "WAPE",
        }
    }
}

/// Working record produced by the classifier.
///
/// `token_ids` keeps first-appearance order from the receipt and holds no
/// duplicates, so `token_ids[0]` is the primary token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleCandidate {
    pub token_ids: Vec<U256>,
    pub transfer_count: usize,
    pub currency: Currency,
    pub raw_price_wei: U256,
    pub seller: Address,
    pub buyer: Address,
    pub tx_hash: B256,
}

impl SaleCandidate {
    pub fn is_bulk(&self) -> bool {
        self.transfer_count > 1
    }

    pub fn primary_token(&self) -> U256 {
        self.token_ids.first().copied().unwrap_or(U256::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trait {
    pub trait_type: String,
    pub value: String,
}

/// Canonical sale record published to downstream formatters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub token_id: String,
    pub display_token_id: String,
    pub price_per_item: Decimal,
    pub total_price: Decimal,
    pub raw_price_wei: String,
    pub currency: Currency,
    pub transfer_count: usize,
    pub is_bulk_sale: bool,
    pub is_wape_sale: bool,
    pub marketplace: String,
    pub buyer: String,
    pub seller: String,
    pub transaction_hash: String,
    pub item_url: String,
    pub tx_url: String,
    pub image_urls: Vec<String>,
    pub traits: Vec<Trait>,
}

/// Result of probing the RPC endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String, // "healthy" or "unhealthy"
    pub last_block: Option<u64>,
    pub provider_connected: bool,
}
