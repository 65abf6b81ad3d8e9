use std::sync::{Arc, Mutex};

use hl_core::types::ClutchRow;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// The kind of mutation that produced a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Modify,
}

/// One entry in the record store's change log: the mutation kind plus the
/// row's new image. Consumers receive changes at least once; redelivery of a
/// whole batch after a consumer failure is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub row: ClutchRow,
}

// ---------------------------------------------------------------------------
// ChangeFeed
// ---------------------------------------------------------------------------

/// A broadcast-style change feed built on top of flume channels.
///
/// Each call to [`subscribe`](ChangeFeed::subscribe) creates a new receiver
/// that will see every change published after the subscription was created.
/// The feed is thread-safe and cheap to clone (it wraps its internals in an
/// `Arc`).
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<Mutex<Vec<flume::Sender<ChangeRecord>>>>,
}

impl ChangeFeed {
    /// Create a new, empty feed with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<ChangeRecord> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("ChangeFeed lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish a change to all current subscribers.
    ///
    /// Disconnected subscribers (whose receivers have been dropped) are
    /// automatically pruned.
    pub fn publish(&self, change: ChangeRecord) {
        let mut senders = self.inner.lock().expect("ChangeFeed lock poisoned");
        senders.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("ChangeFeed lock poisoned");
        senders.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
