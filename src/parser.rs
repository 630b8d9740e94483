// src/parser.rs
use alloy::primitives::{Address, B256, U256};

use crate::models::TransferEvent;
use crate::rpc::{Log, TRANSFER_TOPIC};

fn topic_to_address(topic: &str) -> Option<Address> {
    // topics[1] and topics[2] are 32-byte (padded) hex strings; address is the last 20 bytes
    let s = topic.trim_start_matches("0x");
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let addr_bytes: [u8; 20] = bytes[12..32].try_into().ok()?;
    Some(Address::from(addr_bytes))
}

fn topic_to_u256(topic: &str) -> Option<U256> {
    let bytes = hex::decode(topic.trim_start_matches("0x")).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(U256::from_be_slice(&bytes))
}

pub fn is_transfer_topic(topic: &str) -> bool {
    topic.eq_ignore_ascii_case(TRANSFER_TOPIC)
}

/// Emitting contract of a log, if it parses
pub fn log_address(log: &Log) -> Option<Address> {
    log.address.parse::<Address>().ok()
}

/// Token id of an ERC-721 `Transfer` (all three arguments indexed)
pub fn erc721_token_id(log: &Log) -> Option<U256> {
    if log.topics.len() != 4 || !is_transfer_topic(&log.topics[0]) {
        return None;
    }
    topic_to_u256(&log.topics[3])
}

/// Decode a watched-contract log into a `TransferEvent`
pub fn decode_transfer(log: &Log) -> Option<TransferEvent> {
    let token_id = erc721_token_id(log)?;
    let from = topic_to_address(&log.topics[1])?;
    let to = topic_to_address(&log.topics[2])?;
    let tx_hash = log.tx_hash.as_deref()?.parse::<B256>().ok()?;

    Some(TransferEvent {
        from,
        to,
        token_id,
        tx_hash,
    })
}

/// Amount moved by an ERC-20 `Transfer` (from/to indexed, value in data).
/// Logs with any other shape, or without value data, give `None`.
pub fn erc20_amount(log: &Log) -> Option<U256> {
    if log.topics.len() != 3 || !is_transfer_topic(&log.topics[0]) {
        return None;
    }
    let value_hex = log.data.trim_start_matches("0x");
    if value_hex.is_empty() {
        return None;
    }
    let bytes = hex::decode(value_hex).ok()?;
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(&bytes))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn address_topic(addr: Address) -> String {
        format!("0x{:0>64}", hex::encode(addr.as_slice()))
    }

    pub fn u256_word(value: U256) -> String {
        format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
    }

    pub fn nft_transfer_log(
        contract: Address,
        from: Address,
        to: Address,
        token_id: u64,
        tx_hash: B256,
    ) -> Log {
        Log {
            address: contract.to_checksum(None),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                address_topic(from),
                address_topic(to),
                u256_word(U256::from(token_id)),
            ],
            data: "0x".to_string(),
            tx_hash: Some(format!("{tx_hash:#x}")),
        }
    }

    pub fn erc20_transfer_log(token: Address, from: Address, to: Address, amount: u64) -> Log {
        Log {
            address: token.to_checksum(None),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                address_topic(from),
                address_topic(to),
            ],
            data: u256_word(U256::from(amount)),
            tx_hash: None,
        }
    }
}
