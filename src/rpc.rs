// src/rpc.rs
use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RpcError;
use crate::models::TransactionInfo;

/// Transfer event topic keccak256("Transfer(address,address,uint256)").
/// ERC-20 and ERC-721 share it; they differ in how many topics are indexed.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A raw log as returned by the node. Fields stay as hex strings so one
/// malformed entry can be skipped without failing the whole receipt.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Log {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,

    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Receipt {
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    to: Option<String>,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// The chain queries the sales pipeline depends on.
pub trait ChainRpc: Send + Sync {
    fn block_number(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// `Transfer` logs emitted by `contract` in `[from_block, to_block]`
    fn get_transfer_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, RpcError>> + Send;

    fn get_transaction(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TransactionInfo>, RpcError>> + Send;

    fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<Receipt>, RpcError>> + Send;

    /// Static `eth_call` against the latest block
    fn call(
        &self,
        to: Address,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, RpcError>> + Send;
}

/// JSON-RPC over HTTP
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        debug!("📡 Sending {} → {}", method, self.url);

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(RpcError::Http(resp.status()));
        }
        let text = resp.text().await?;

        let parsed: RpcResponse<T> = serde_json::from_str(&text)?;
        if let Some(err) = parsed.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result)
    }

    async fn request_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| RpcError::Decode(format!("{method} returned no result")))
    }
}

fn parse_quantity(hex_str: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Decode(format!("bad quantity {hex_str}: {e}")))
}

impl ChainRpc for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let hex_str: String = self.request_required("eth_blockNumber", json!([])).await?;
        parse_quantity(&hex_str)
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let hex_str: String = self.request_required("eth_chainId", json!([])).await?;
        parse_quantity(&hex_str)
    }

    async fn get_transfer_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let params = json!([{
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "address": contract.to_checksum(None),
            "topics": [TRANSFER_TOPIC]
        }]);

        debug!(
            "📡 eth_getLogs range {} → {} for {}",
            from_block, to_block, contract
        );

        self.request_required("eth_getLogs", params).await
    }

    async fn get_transaction(&self, tx_hash: B256) -> Result<Option<TransactionInfo>, RpcError> {
        let raw: Option<RawTransaction> = self
            .request("eth_getTransactionByHash", json!([format!("{tx_hash:#x}")]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let to = match raw.to.as_deref() {
            Some(s) => Some(
                s.parse::<Address>()
                    .map_err(|e| RpcError::Decode(format!("bad tx.to {s}: {e}")))?,
            ),
            None => None, // contract creation
        };
        let value = U256::from_str_radix(raw.value.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Decode(format!("bad tx.value {}: {e}", raw.value)))?;

        Ok(Some(TransactionInfo { to, value }))
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([format!("{tx_hash:#x}")]))
            .await
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let params = json!([
            {
                "to": to.to_checksum(None),
                "data": format!("0x{}", hex::encode(&data))
            },
            "latest"
        ]);
        let out: String = self.request_required("eth_call", params).await?;
        hex::decode(out.trim_start_matches("0x"))
            .map_err(|e| RpcError::Decode(format!("bad eth_call output: {e}")))
    }
}
