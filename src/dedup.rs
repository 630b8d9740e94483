// src/dedup.rs
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::SaleCandidate;

/// Identity of a real-world sale.
///
/// A bulk sale is keyed by transaction hash alone, so every transfer
/// notification of the same sweep maps to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_sale(candidate: &SaleCandidate) -> Self {
        let tx = format!("{:#x}", candidate.tx_hash);
        if candidate.is_bulk() {
            DedupKey(tx)
        } else {
            DedupKey(format!("{}-{}", candidate.primary_token(), tx))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where reserved sale keys live. Operations are synchronous so a
/// test-and-insert never straddles an await point.
pub trait SaleStore: Send + Sync {
    /// Insert `key` unless present; true if this call inserted it
    fn insert_if_absent(&self, key: &str, at: DateTime<Utc>) -> bool;

    fn remove(&self, key: &str) -> bool;

    fn len(&self) -> usize;
}

/// Process-lifetime store; history is lost on restart
#[derive(Debug, Default)]
pub struct InMemorySaleStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemorySaleStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // a panicked holder cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SaleStore for InMemorySaleStore {
    fn insert_if_absent(&self, key: &str, at: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), at);
        true
    }

    fn remove(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// At-most-once gate in front of sale emission
pub struct DedupGuard<S = InMemorySaleStore> {
    store: S,
}

impl Default for DedupGuard<InMemorySaleStore> {
    fn default() -> Self {
        Self::new(InMemorySaleStore::default())
    }
}

impl<S: SaleStore> DedupGuard<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Claim `key`. False means another handler already owns this sale.
    pub fn reserve(&self, key: &DedupKey) -> bool {
        let won = self.store.insert_if_absent(key.as_str(), Utc::now());
        if !won {
            debug!("Sale already processed: {}", key);
        }
        won
    }

    /// Give a key back after a failed pipeline run. Never call this once
    /// the sale has been published.
    pub fn release(&self, key: &DedupKey) {
        if self.store.remove(key.as_str()) {
            debug!("Released sale key {}", key);
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.store.len()
    }
}
