//! Store event feed.
//!
//! Every store mutation emits one [`StoreEvent`] after its state is updated.
//! Events are delivered to all subscribers in emission order and kept in a
//! bounded history for late observers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = RecordStore::new("Contact", transport);
//! let events = store.subscribe();
//!
//! store.search(SearchOptions::new()).await?;
//!
//! while let Ok(notification) = events.try_recv() {
//!     println!("{:?}", notification.event);
//! }
//! ```

use crate::store::Page;
use formsync_protocol::{Map, RecordKey};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// A store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The cached page changed.
    Change {
        /// Page after the change.
        page: Page,
    },
    /// Records were written.
    Saved {
        /// Records as returned by the server.
        records: Vec<Map>,
    },
    /// Records were deleted.
    Removed {
        /// Deleted identities.
        keys: Vec<RecordKey>,
    },
    /// Values for nested records were deferred until they load.
    PendingNested {
        /// Paths of the deferred nested records.
        paths: Vec<String>,
    },
}

/// A store event with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreNotification {
    /// Sequence number, starting at 1.
    pub sequence: u64,
    /// The event.
    pub event: StoreEvent,
}

/// Distributes store events to subscribers.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<StoreNotification>>>,
    history: RwLock<Vec<StoreNotification>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl EventFeed {
    /// Creates a feed with a history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Receiver<StoreNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event and returns its sequence number.
    pub fn emit(&self, event: StoreEvent) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let notification = StoreNotification { sequence, event };

        {
            let mut history = self.history.write();
            history.push(notification.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
        sequence
    }

    /// Returns events with a sequence above `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StoreNotification> {
        self.history
            .read()
            .iter()
            .filter(|n| n.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest emitted sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::with_max_history(1000)
    }
}

impl std::fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("sequence", &self.latest_sequence())
            .finish()
    }
}
