// src/error.rs
use alloy::primitives::B256;
use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the chain's JSON-RPC endpoint.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC error: HTTP {0}")]
    Http(StatusCode),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed RPC response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Provider/server-class failures that are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            RpcError::Transport(_) => true,
            RpcError::Http(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            // -32000..=-32099 is the implementation-defined server range,
            // -32603 is "internal error", -32005 is the common rate-limit code
            RpcError::Rpc { code, .. } => (-32099..=-32000).contains(code) || *code == -32603,
            RpcError::Decode(_) => false,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}

/// Outcome of a request that [`RetryPolicy::run`](crate::receipt::RetryPolicy::run) gave up on.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RpcError },

    #[error(transparent)]
    Fatal(RpcError),
}

#[derive(Debug, Error)]
pub enum ReceiptFetchError {
    #[error("receipt for {tx_hash:#x} unavailable after {attempts} attempts: {last}")]
    Exhausted {
        tx_hash: B256,
        attempts: u32,
        last: RpcError,
    },

    #[error("receipt request failed: {0}")]
    Rpc(RpcError),

    #[error("no receipt for {0:#x}")]
    NotFound(B256),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("tokenURI and uri both failed: {0}")]
    TokenUri(RpcError),

    #[error("could not decode token URI: {0}")]
    UriDecode(String),

    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata request failed: HTTP {0}")]
    Status(StatusCode),

    #[error("invalid metadata document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised inside the per-transfer sale pipeline.
#[derive(Debug, Error)]
pub enum SaleError {
    #[error("transaction lookup failed: {0}")]
    Transaction(#[from] RpcError),

    #[error("transaction {0:#x} not found")]
    TransactionNotFound(B256),

    #[error("transaction {tx_hash:#x} unavailable after {attempts} attempts: {last}")]
    TransactionUnavailable {
        tx_hash: B256,
        attempts: u32,
        last: RpcError,
    },

    #[error(transparent)]
    Receipt(#[from] ReceiptFetchError),

    #[error("price {0} wei does not fit a decimal amount")]
    PriceOverflow(String),

    #[error("no subscribers on the sale feed")]
    FeedClosed,
}
