//! Sale detection for watched-collection transfers.
//!
//! There is no on-chain "sale" event. A transfer counts as a marketplace sale
//! when the transaction went straight to an allow-listed marketplace contract
//! and either carried native value or hit the bid-acceptance contract, which
//! settles in wrapped APE with zero native value.

use std::collections::HashSet;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::Config;
use crate::error::SaleError;
use crate::models::{Currency, SaleCandidate, TransactionContext, TransactionInfo, TransferEvent};
use crate::parser;
use crate::rpc::Receipt;

const WEI_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub struct SaleClassifier {
    contract: Address,
    marketplaces: HashSet<Address>,
    bid_acceptance: Address,
}

/// Display amounts for a classified sale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pricing {
    pub price_per_item: Decimal,
    pub total_price: Decimal,
}

impl SaleClassifier {
    pub fn new(contract: Address, marketplaces: HashSet<Address>, bid_acceptance: Address) -> Self {
        Self {
            contract,
            marketplaces,
            bid_acceptance,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.contract_address,
            cfg.marketplace_addresses.clone(),
            cfg.bid_acceptance_address,
        )
    }

    fn is_bid_acceptance(&self, tx: &TransactionInfo) -> bool {
        tx.to == Some(self.bid_acceptance)
    }

    /// Marketplace recipient AND (native value OR bid acceptance)
    pub fn is_sale_candidate(&self, tx: &TransactionInfo) -> bool {
        let to_marketplace = tx.to.is_some_and(|to| self.marketplaces.contains(&to));
        let has_value = !tx.value.is_zero();
        let bid_accept = self.is_bid_acceptance(tx);

        debug!(
            to_marketplace,
            has_value, bid_accept, "sale candidacy for tx to {:?}", tx.to
        );

        to_marketplace && (has_value || bid_accept)
    }

    /// Distinct token ids moved by the watched contract, in log order
    pub fn collect_token_ids(&self, receipt: &Receipt) -> Vec<U256> {
        let mut seen = HashSet::new();
        receipt
            .logs
            .iter()
            .filter(|log| parser::log_address(log) == Some(self.contract))
            .filter_map(parser::erc721_token_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Largest ERC-20 transfer in the receipt: the settlement leg, as
    /// opposed to the fee and royalty legs routed in the same transaction.
    /// Ties keep the first occurrence.
    pub fn settlement_amount(receipt: &Receipt) -> Option<U256> {
        let mut best: Option<U256> = None;
        for log in &receipt.logs {
            let Some(amount) = parser::erc20_amount(log) else {
                continue;
            };
            debug!(data = %log.data, amount = %amount, "WAPE transfer leg");
            if best.map_or(true, |b| amount > b) {
                best = Some(amount);
            }
        }
        best
    }

    /// Turn a candidate transaction into a priced sale, or `None` when it
    /// moved nothing of ours or resolved to a zero price (gifts, transfers).
    pub fn classify(&self, event: &TransferEvent, ctx: &TransactionContext) -> Option<SaleCandidate> {
        let token_ids = self.collect_token_ids(&ctx.receipt);
        if token_ids.is_empty() {
            debug!("No watched-contract transfers in {:#x}", event.tx_hash);
            return None;
        }

        let is_wape = self.is_bid_acceptance(&ctx.tx);
        let mut price = ctx.tx.value;
        if price.is_zero() && is_wape {
            price = Self::settlement_amount(&ctx.receipt).unwrap_or(U256::ZERO);
        }

        if price.is_zero() {
            debug!("Skipping sale {:#x} - zero price detected", event.tx_hash);
            return None;
        }

        let transfer_count = token_ids.len();
        debug!(
            tx = %format!("{:#x}", event.tx_hash),
            transfer_count,
            raw_price = %price,
            is_wape,
            "classified sale"
        );

        Some(SaleCandidate {
            token_ids,
            transfer_count,
            currency: if is_wape { Currency::Wape } else { Currency::Ape },
            raw_price_wei: price,
            seller: event.from,
            buyer: event.to,
            tx_hash: event.tx_hash,
        })
    }
}

/// Convert a wei amount into an 18-decimal `Decimal`
pub fn wei_to_decimal(wei: U256) -> Result<Decimal, SaleError> {
    let overflow = || SaleError::PriceOverflow(wei.to_string());
    let raw = i128::try_from(u128::try_from(wei).map_err(|_| overflow())?).map_err(|_| overflow())?;
    Decimal::try_from_i128_with_scale(raw, WEI_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|_| overflow())
}

/// Split the resolved price across the items in the transaction.
///
/// A WAPE bid is accepted per item, so every item sells for the full amount
/// and the total scales with the count. Native value is what the buyer paid
/// for the whole sweep, so it is divided.
pub fn price_breakdown(candidate: &SaleCandidate) -> Result<Pricing, SaleError> {
    let price = wei_to_decimal(candidate.raw_price_wei)?;
    let count = Decimal::from(candidate.transfer_count.max(1) as u64);

    let pricing = match candidate.currency {
        Currency::Wape => Pricing {
            price_per_item: price,
            total_price: price
                .checked_mul(count)
                .ok_or_else(|| SaleError::PriceOverflow(candidate.raw_price_wei.to_string()))?
                .normalize(),
        },
        Currency::Ape => Pricing {
            price_per_item: (price / count).normalize(),
            total_price: price,
        },
    };
    Ok(pricing)
}
