//! Reference-counted channel interest over the single push connection.
//!
//! The transport sees exactly one `subscribe` on a channel's 0→1 edge and one
//! `unsubscribe` on its 1→0 edge, however many views share the channel. Each
//! newly opened connection is sent a `subscribe` for every channel still held.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use feed_protocol::{Channel, ControlFrame};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{ConnectionState, Connector, Link};

/// Receives every inbound text frame, in delivery order.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, raw: &str);
}

#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn InboundHandler>,
    registry: Mutex<Registry>,
    connect_lock: AsyncMutex<()>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Registry {
    counts: BTreeMap<Channel, usize>,
    link: Option<ActiveLink>,
    /// Bumped by `shutdown`; guards from an older generation are inert.
    generation: u64,
    link_seq: u64,
}

struct ActiveLink {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    _io: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn send(&self, frame: &ControlFrame) -> Result<(), TransportError> {
        let text = frame.to_text()?;
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    fn send_logged(&self, frame: &ControlFrame) {
        match self.send(frame) {
            Ok(()) => debug!(channel = frame.channel(), ?frame, "control frame sent"),
            Err(err) => warn!(channel = frame.channel(), error = %err, "control frame not sent"),
        }
    }
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Shared {
    fn link_lost(&self, id: u64) {
        let mut registry = self.registry.lock();
        if registry.link.as_ref().is_some_and(|link| link.id == id) {
            registry.link = None;
            self.state.send_replace(ConnectionState::Disconnected);
            info!(channels = registry.counts.len(), "push connection lost");
        }
    }
}

async fn read_loop(shared: Weak<Shared>, id: u64, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(raw) = inbound.recv().await {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        strong.handler.on_message(&raw);
    }
    if let Some(strong) = shared.upgrade() {
        strong.link_lost(id);
    }
}

impl SubscriptionManager {
    pub fn new(connector: Arc<dyn Connector>, handler: Arc<dyn InboundHandler>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Shared {
                connector,
                handler,
                registry: Mutex::new(Registry::default()),
                connect_lock: AsyncMutex::new(()),
                state,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Current reference count of `channel`; zero when not held.
    pub fn refs(&self, channel: &str) -> usize {
        self.inner
            .registry
            .lock()
            .counts
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Channels with a positive reference count.
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.registry.lock().counts.keys().cloned().collect()
    }

    /// Registers interest in `channel`, opening the connection if needed.
    ///
    /// Never fails: when the connection cannot be opened the interest is still
    /// recorded and gets subscribed by the next successful connect.
    pub async fn acquire(&self, channel: impl Into<Channel>) -> ChannelGuard {
        let channel = channel.into();
        if let Err(err) = self.ensure_connected().await {
            warn!(%channel, error = %err, "push connection unavailable");
        }

        let generation = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;
            let count = registry.counts.entry(channel.clone()).or_insert(0);
            *count += 1;
            let refs = *count;
            if refs == 1 {
                if let Some(link) = &registry.link {
                    link.send_logged(&ControlFrame::Subscribe {
                        channel: channel.to_string(),
                    });
                }
            }
            debug!(%channel, refs, "channel acquired");
            registry.generation
        };

        ChannelGuard {
            manager: self.clone(),
            channel,
            generation,
            released: false,
        }
    }

    /// Drops one reference to `channel`. Unknown channels are ignored.
    pub fn release(&self, channel: &str) {
        let generation = self.inner.registry.lock().generation;
        self.release_at(channel, generation);
    }

    fn release_at(&self, channel: &str, generation: u64) {
        let idle_link = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;
            if registry.generation != generation {
                debug!(channel, "ignoring release from before shutdown");
                return;
            }
            let Some(count) = registry.counts.get_mut(channel) else {
                return;
            };
            *count -= 1;
            if *count > 0 {
                debug!(channel, refs = *count, "channel released");
                return;
            }
            registry.counts.remove(channel);
            if let Some(link) = &registry.link {
                link.send_logged(&ControlFrame::Unsubscribe {
                    channel: channel.to_string(),
                });
            }
            if registry.counts.is_empty() {
                registry.link.take()
            } else {
                None
            }
        };

        if idle_link.is_some() {
            info!("no channels held; closing push connection");
            drop(idle_link);
            self.inner.state.send_replace(ConnectionState::Disconnected);
        }
    }

    /// Replaces the current connection with a fresh one and re-subscribes
    /// every held channel on it.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let _connecting = self.inner.connect_lock.lock().await;
        let previous = self.inner.registry.lock().link.take();
        drop(previous);
        self.open().await
    }

    /// Closes the connection regardless of outstanding references and clears
    /// the registry.
    pub fn shutdown(&self) {
        let (link, dropped) = {
            let mut registry = self.inner.registry.lock();
            registry.generation += 1;
            let dropped = registry.counts.len();
            registry.counts.clear();
            (registry.link.take(), dropped)
        };
        drop(link);
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!(channels = dropped, "subscriptions shut down");
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.inner.registry.lock().link.is_some() {
            return Ok(());
        }
        let _connecting = self.inner.connect_lock.lock().await;
        if self.inner.registry.lock().link.is_some() {
            return Ok(());
        }
        self.open().await
    }

    /// Callers hold `connect_lock`.
    async fn open(&self) -> Result<(), TransportError> {
        let generation = self.inner.registry.lock().generation;
        self.inner.state.send_replace(ConnectionState::Connecting);
        let Link {
            outbound,
            inbound,
            task,
        } = match self.inner.connector.connect().await {
            Ok(link) => link,
            Err(err) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let mut guard = self.inner.registry.lock();
        let registry = &mut *guard;
        if registry.generation != generation {
            self.inner.state.send_replace(ConnectionState::Disconnected);
            return Err(TransportError::Closed);
        }
        registry.link_seq += 1;
        let id = registry.link_seq;
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.inner), id, inbound));
        let link = ActiveLink {
            id,
            outbound,
            reader,
            _io: task,
        };
        for channel in registry.counts.keys() {
            link.send_logged(&ControlFrame::Subscribe {
                channel: channel.to_string(),
            });
        }
        registry.link = Some(link);
        self.inner.state.send_replace(ConnectionState::Connected);
        info!(channels = registry.counts.len(), "push connection ready");
        Ok(())
    }
}

/// One reference to a channel. Dropping it releases the reference.
#[must_use = "dropping the guard releases the channel immediately"]
pub struct ChannelGuard {
    manager: SubscriptionManager,
    channel: Channel,
    generation: u64,
    released: bool,
}

impl ChannelGuard {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.manager
            .release_at(self.channel.as_str(), self.generation);
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for ChannelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("channel", &self.channel)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}
