//! Rule change feed
//!
//! Stores publish a payload-free signal after every successful write. The
//! signal does not say which device or product changed; subscribers that
//! cache derived state must drop all of it.

use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered signals per subscriber
pub const DEFAULT_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleChange {
    Created,
    Saved,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RuleChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change; having no subscribers is not an error
    pub fn publish(&self, change: RuleChange) {
        if self.sender.send(change).is_err() {
            debug!("Rule change {:?} published with no subscribers", change);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
