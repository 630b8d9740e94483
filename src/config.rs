use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{collections::HashSet, env, str::FromStr, time::Duration};
use alloy::primitives::Address;
use tracing::warn;

const DEFAULT_CONTRACT: &str = "0xa6bAbE18F2318D2880DD7dA3126C19536048F8B0";
const DEFAULT_BID_ACCEPTANCE: &str = "0x224ecB4Eae96d31372D1090c3B0233C8310dBbaB";
const DEFAULT_MARKETPLACES: &str = "0x0000000000000068F116a894984e2DB1123eB395,\
0x1d3a594EAf472ca2ceC2A8aE44478c06d6A37E22,\
0x224ecB4Eae96d31372D1090c3B0233C8310dBbaB";
const DEFAULT_GATEWAYS: &str = "https://nftstorage.link/ipfs/,\
https://cloudflare-ipfs.com/ipfs/,\
https://ipfs.io/ipfs/,\
https://gateway.pinata.cloud/ipfs/,\
https://dweb.link/ipfs/";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub contract_address: Address,
    pub marketplace_name: String,
    pub marketplace_addresses: HashSet<Address>,
    pub bid_acceptance_address: Address,
    pub token_id_offset: u64,
    pub item_url_template: String, // {contract}, {tokenId}
    pub tx_url_template: String,   // {txHash}
    pub ipfs_gateways: Vec<String>,
    pub gateway_timeout: Duration,
    pub poll_interval: Duration,
    pub confirmations: u64,
    pub max_block_range: u64,
    pub start_block: Option<u64>,
    pub expected_chain_id: u64,
    pub port: u16,
    pub debug_mode: bool,
}

/// Read `DEBUG_MODE` ahead of the full load so logging can be set up first
pub fn debug_mode() -> bool {
    dotenv().ok();
    parse_flag(env::var("DEBUG_MODE").ok().as_deref())
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // load from .env file
    from_lookup(|key| env::var(key).ok())
}

/// Build a config from any key → value source
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

    // RPC_URL wins, RPC_HTTP_URL is accepted as an alias
    let rpc_http_url = lookup("RPC_URL")
        .or_else(|| lookup("RPC_HTTP_URL"))
        .unwrap_or_else(|| "https://apechain.drpc.org".to_string());

    let contract_address = parse_address("CONTRACT_ADDRESS", &var("CONTRACT_ADDRESS", DEFAULT_CONTRACT))?;
    let bid_acceptance_address = parse_address(
        "BID_ACCEPTANCE_ADDRESS",
        &var("BID_ACCEPTANCE_ADDRESS", DEFAULT_BID_ACCEPTANCE),
    )?;

    // invalid entries are skipped, not fatal
    let marketplace_addresses: HashSet<Address> = var("MARKETPLACE_ADDRESSES", DEFAULT_MARKETPLACES)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Address>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!("Ignoring marketplace address {}: {}", s, e);
                None
            }
        })
        .collect();

    if marketplace_addresses.is_empty() {
        return Err(eyre!("MARKETPLACE_ADDRESSES has no valid address"));
    }

    let ipfs_gateways: Vec<String> = var("IPFS_GATEWAYS", DEFAULT_GATEWAYS)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if ipfs_gateways.is_empty() {
        return Err(eyre!("IPFS_GATEWAYS is empty"));
    }

    let start_block = match lookup("START_BLOCK") {
        Some(raw) => Some(
            raw.trim()
                .parse()
                .map_err(|e| eyre!("invalid START_BLOCK {}: {}", raw, e))?,
        ),
        None => None,
    };

    Ok(Config {
        rpc_http_url,
        contract_address,
        marketplace_name: var("MARKETPLACE_NAME", "Magic Eden"),
        marketplace_addresses,
        bid_acceptance_address,
        token_id_offset: parse_or(lookup("TOKEN_ID_OFFSET"), 1),
        item_url_template: var(
            "ITEM_URL_TEMPLATE",
            "https://magiceden.io/item-details/apechain/{contract}/{tokenId}",
        ),
        tx_url_template: var("TX_URL_TEMPLATE", "https://apescan.io/tx/{txHash}"),
        ipfs_gateways,
        gateway_timeout: Duration::from_secs(parse_or(lookup("GATEWAY_TIMEOUT_SECS"), 5)),
        poll_interval: Duration::from_secs(parse_or(lookup("POLL_INTERVAL_SECS"), 4)),
        confirmations: parse_or(lookup("CONFIRMATIONS"), 0),
        max_block_range: parse_or(lookup("MAX_BLOCK_RANGE"), 500).max(1),
        start_block,
        expected_chain_id: parse_or(lookup("CHAIN_ID"), 33139),
        port: parse_or(lookup("PORT"), 8080),
        debug_mode: parse_flag(lookup("DEBUG_MODE").as_deref()),
    })
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| eyre!("invalid {} {}: {}", key, raw, e))
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
