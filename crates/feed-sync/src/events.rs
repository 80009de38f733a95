use tokio::sync::broadcast;
use tracing::trace;

use crate::keys::{PartitionKey, ReactionKey};

/// Change notification for UI layers observing the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Items or cursor of a partition changed.
    PartitionChanged(PartitionKey),
    /// A partition was dropped by an explicit reset.
    PartitionReset(PartitionKey),
    ReactionsChanged(ReactionKey),
}

/// Fan-out of [`CacheEvent`]s. Emitting without subscribers is fine.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<CacheEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CacheEvent) {
        if let Err(err) = self.tx.send(event) {
            trace!(event = ?err.0, "no subscribers for cache event");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
