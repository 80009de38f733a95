//! Real-time cache synchronisation for the feed client.
//!
//! Two unordered sources feed one [`EntityCache`]: paged reads driven through
//! the [`Paginator`], and pushed deltas decoded by the [`PushDispatcher`].
//! Every mutation is an idempotent upsert or remove keyed by entity id, so the
//! cache converges whichever source lands first. Channel interest is reference
//! counted by the [`SubscriptionManager`], which owns the single push connection.
//! [`SyncEngine`] wires the pieces together for a UI layer.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod keys;
pub mod paginator;
pub mod source;
pub mod subscription;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{Cursor, EntityCache, Partition, Placement, ReactionSummary, SharedCache, Upsert};
pub use config::{ResponsePlacement, SyncConfig};
pub use dispatcher::{Dispatch, PushDispatcher};
pub use engine::{MountedView, SyncEngine, View};
pub use error::{FetchError, TransportError};
pub use events::{CacheEvent, Notifier};
pub use http::{HttpPageSource, CSRF_HEADER};
pub use keys::{FeedScope, PartitionKey, ReactionKey};
pub use paginator::{FetchStatus, Paginator};
pub use source::{FeedWriter, PageSource};
pub use subscription::{ChannelGuard, InboundHandler, SubscriptionManager};
pub use transport::{ConnectionState, Connector, Link};

pub use feed_protocol as protocol;
