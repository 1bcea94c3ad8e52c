//! Published store
//!
//! Holds the record set consumers read. Backed by a `watch` channel: readers
//! take lock-free snapshots and may await replacements. Only the gate
//! writes, and every write replaces the whole set.

use std::sync::Arc;

use tokio::sync::watch;
use types::errors::FeedError;
use types::record::{AggregatedRecord, PublishedSet};

/// Write side of the published set.
pub struct PublishedStore {
    tx: watch::Sender<PublishedSet>,
}

impl PublishedStore {
    /// A store in the loading state with no records.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PublishedSet::initial());
        Self { tx }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current_set(&self) -> PublishedSet {
        self.tx.borrow().clone()
    }

    /// Replace the record set, clear loading, and return the new revision.
    pub(crate) fn replace(&self, records: Arc<Vec<AggregatedRecord>>) -> u64 {
        let revision = self.tx.borrow().revision + 1;
        self.tx.send_replace(PublishedSet {
            records,
            loading: false,
            revision,
        });
        revision
    }
}

impl Default for PublishedStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the published set. Cheap to clone.
#[derive(Clone)]
pub struct StoreReader {
    rx: watch::Receiver<PublishedSet>,
}

impl StoreReader {
    /// Snapshot of the latest published set.
    pub fn current_set(&self) -> PublishedSet {
        self.rx.borrow().clone()
    }

    /// Wait for the next replacement and return it.
    pub async fn changed(&mut self) -> Result<PublishedSet, FeedError> {
        self.rx.changed().await.map_err(|_| FeedError::Stopped)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}
