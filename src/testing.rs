//! In-memory chain and HTTP doubles for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{MetadataError, RpcError};
use crate::metadata::{ITokenMetadata, MetadataHttp};
use crate::models::TransactionInfo;
use crate::rpc::{ChainRpc, Log, Receipt};

#[derive(Default)]
struct ChainState {
    block_number: u64,
    chain_id: u64,
    pending_logs: Vec<Log>,
    transactions: HashMap<B256, TransactionInfo>,
    receipts: HashMap<B256, Receipt>,
    receipt_failures: VecDeque<RpcError>,
    receipt_calls: usize,
    receipt_call_times: Vec<Instant>,
    transaction_failures: VecDeque<RpcError>,
    transaction_calls: usize,
    token_uris: HashMap<U256, String>,
    uri_only: HashMap<U256, String>,
    empty_token_uri: HashSet<U256>,
    calls_revert: bool,
    call_count: usize,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn set_block_number(&self, block: u64) {
        self.state().block_number = block;
    }

    pub fn set_chain_id(&self, id: u64) {
        self.state().chain_id = id;
    }

    pub fn push_logs(&self, logs: Vec<Log>) {
        self.state().pending_logs.extend(logs);
    }

    pub fn add_transaction(&self, tx_hash: B256, to: Address, value: U256) {
        self.state()
            .transactions
            .insert(tx_hash, TransactionInfo { to: Some(to), value });
    }

    pub fn add_receipt(&self, tx_hash: B256, receipt: Receipt) {
        self.state().receipts.insert(tx_hash, receipt);
    }

    /// Errors returned, in order, by the next receipt requests
    pub fn fail_receipts(&self, errors: Vec<RpcError>) {
        self.state().receipt_failures.extend(errors);
    }

    pub fn receipt_calls(&self) -> usize {
        self.state().receipt_calls
    }

    /// When each receipt request arrived, on the tokio clock
    pub fn receipt_call_times(&self) -> Vec<Instant> {
        self.state().receipt_call_times.clone()
    }

    /// Errors returned, in order, by the next transaction lookups
    pub fn fail_transactions(&self, errors: Vec<RpcError>) {
        self.state().transaction_failures.extend(errors);
    }

    pub fn transaction_calls(&self) -> usize {
        self.state().transaction_calls
    }

    pub fn set_token_uri(&self, token_id: u64, uri: &str) {
        self.state().token_uris.insert(U256::from(token_id), uri.to_string());
    }

    /// Token whose `tokenURI` reverts but `uri` answers
    pub fn set_uri_only(&self, token_id: u64, uri: &str) {
        self.state().uri_only.insert(U256::from(token_id), uri.to_string());
    }

    /// Token whose `tokenURI` answers with empty return data
    pub fn set_empty_token_uri(&self, token_id: u64) {
        self.state().empty_token_uri.insert(U256::from(token_id));
    }

    pub fn fail_calls(&self) {
        self.state().calls_revert = true;
    }

    pub fn call_count(&self) -> usize {
        self.state().call_count
    }
}

fn reverted() -> RpcError {
    RpcError::Rpc {
        code: 3,
        message: "execution reverted".into(),
    }
}

/// ABI encoding of a single `string` return value
pub fn abi_string(s: &str) -> Vec<u8> {
    let mut out = U256::from(32).to_be_bytes::<32>().to_vec();
    out.extend_from_slice(&U256::from(s.len()).to_be_bytes::<32>());
    out.extend_from_slice(s.as_bytes());
    let padding = (32 - s.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

impl ChainRpc for MockChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.state().block_number)
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(self.state().chain_id)
    }

    async fn get_transfer_logs(
        &self,
        _contract: Address,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        Ok(std::mem::take(&mut self.state().pending_logs))
    }

    async fn get_transaction(&self, tx_hash: B256) -> Result<Option<TransactionInfo>, RpcError> {
        // let other in-flight handlers run, like a real round trip
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.transaction_calls += 1;
        if let Some(err) = state.transaction_failures.pop_front() {
            return Err(err);
        }
        Ok(state.transactions.get(&tx_hash).cloned())
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.receipt_calls += 1;
        state.receipt_call_times.push(Instant::now());
        if let Some(err) = state.receipt_failures.pop_front() {
            return Err(err);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, _to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let mut state = self.state();
        state.call_count += 1;
        if state.calls_revert || data.len() < 36 {
            return Err(reverted());
        }
        let token_id = U256::from_be_slice(&data[4..36]);
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];

        if selector == ITokenMetadata::tokenURICall::SELECTOR {
            if state.empty_token_uri.contains(&token_id) {
                return Ok(Vec::new());
            }
            state.token_uris.get(&token_id).map(|s| abi_string(s)).ok_or_else(reverted)
        } else if selector == ITokenMetadata::uriCall::SELECTOR {
            state
                .token_uris
                .get(&token_id)
                .or_else(|| state.uri_only.get(&token_id))
                .map(|s| abi_string(s))
                .ok_or_else(reverted)
        } else {
            Err(reverted())
        }
    }
}

#[derive(Default)]
struct HttpState {
    documents: HashMap<String, Value>,
    failing_probes: HashSet<String>,
    hanging_probes: HashSet<String>,
    probe_count: usize,
    fetch_count: usize,
}

/// Every probe succeeds unless marked failing or hanging
#[derive(Clone, Default)]
pub struct MockHttp {
    state: Arc<Mutex<HttpState>>,
}

impl MockHttp {
    fn state(&self) -> std::sync::MutexGuard<'_, HttpState> {
        self.state.lock().unwrap()
    }

    pub fn set_json(&self, url: &str, doc: Value) {
        self.state().documents.insert(url.to_string(), doc);
    }

    pub fn fail_probe(&self, url: &str) {
        self.state().failing_probes.insert(url.to_string());
    }

    pub fn hang_probe(&self, url: &str) {
        self.state().hanging_probes.insert(url.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.state().probe_count
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }
}

impl MetadataHttp for MockHttp {
    async fn probe(&self, url: &str) -> Result<bool, MetadataError> {
        let (hang, fail) = {
            let mut state = self.state();
            state.probe_count += 1;
            (
                state.hanging_probes.contains(url),
                state.failing_probes.contains(url),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(!fail)
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, MetadataError> {
        let mut state = self.state();
        state.fetch_count += 1;
        state
            .documents
            .get(url)
            .cloned()
            .ok_or(MetadataError::Status(reqwest::StatusCode::NOT_FOUND))
    }
}
