// src/feed.rs
use tokio::sync::broadcast;

use crate::error::SaleError;
use crate::models::SaleRecord;

/// Typed fan-out channel carrying published sales to downstream consumers.
/// Consumers see records in publish order; a lagging consumer loses the
/// oldest ones once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct SaleFeed {
    tx: broadcast::Sender<SaleRecord>,
}

impl SaleFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaleRecord> {
        self.tx.subscribe()
    }

    /// Publish one sale; fails when nobody is listening
    pub fn publish(&self, record: SaleRecord) -> Result<usize, SaleError> {
        self.tx.send(record).map_err(|_| SaleError::FeedClosed)
    }
}
