use std::sync::Arc;

use feed_protocol::{
    Channel, Delta, EntityId, EntityKind, Reaction, ReactionDraft, ReactionRef, Request,
    RequestDraft, RequestRef, Response, ResponseDraft, ResponseRef,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::cache::{Cursor, EntityCache, ReactionSummary, SharedCache};
use crate::config::SyncConfig;
use crate::dispatcher::PushDispatcher;
use crate::error::{FetchError, TransportError};
use crate::events::{CacheEvent, Notifier};
use crate::http::HttpPageSource;
use crate::keys::{FeedScope, PartitionKey, ReactionKey};
use crate::paginator::{FetchStatus, Paginator};
use crate::source::{FeedWriter, PageSource};
use crate::subscription::{ChannelGuard, SubscriptionManager};
use crate::transport::{ConnectionState, Connector, WebSocketConnector};

/// Something a UI layer shows and keeps live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Feed(FeedScope),
    /// A request's response list.
    Request(EntityId),
    Reactions(ReactionKey),
}

impl View {
    /// The paginated partition behind the view, if it has one.
    pub fn partition(&self) -> Option<PartitionKey> {
        match self {
            View::Feed(scope) => Some(PartitionKey::Feed(*scope)),
            View::Request(id) => Some(PartitionKey::responses(id.clone())),
            View::Reactions(_) => None,
        }
    }
}

/// A view's hold on its channel. Dropping it releases the channel but keeps
/// the cached data; [`MountedView::unmount`] can also clear it.
#[must_use = "dropping a mounted view releases its channel"]
#[derive(Debug)]
pub struct MountedView {
    view: View,
    guard: Option<ChannelGuard>,
}

impl MountedView {
    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.guard.as_ref().map(ChannelGuard::channel)
    }

    pub fn unmount(self, engine: &SyncEngine, clear: bool) {
        let MountedView { view, guard } = self;
        if let Some(guard) = guard {
            guard.release();
        }
        if clear {
            engine.clear_view(&view);
        }
    }
}

/// One application session: a shared cache fed by paged reads and pushed
/// deltas, plus the connection that carries the deltas.
pub struct SyncEngine {
    config: SyncConfig,
    cache: SharedCache,
    notifier: Notifier,
    paginator: Paginator,
    dispatcher: Arc<PushDispatcher>,
    subscriptions: SubscriptionManager,
    source: Arc<dyn PageSource>,
    writer: Arc<dyn FeedWriter>,
}

/// Closes a reaction snapshot window however the load ends.
struct OpenSnapshot<'a> {
    cache: &'a SharedCache,
    key: &'a ReactionKey,
    token: u64,
}

impl Drop for OpenSnapshot<'_> {
    fn drop(&mut self) {
        self.cache.lock().end_reaction_snapshot(self.key, self.token);
    }
}

impl SyncEngine {
    /// Engine whose reads and writes both go to `backend`.
    pub fn new<B>(config: SyncConfig, backend: Arc<B>, connector: Arc<dyn Connector>) -> Self
    where
        B: PageSource + FeedWriter + 'static,
    {
        Self::from_parts(config, backend.clone(), backend, connector)
    }

    pub fn from_parts(
        config: SyncConfig,
        source: Arc<dyn PageSource>,
        writer: Arc<dyn FeedWriter>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let cache = EntityCache::shared();
        let notifier = Notifier::new(config.event_capacity);
        let paginator = Paginator::new(cache.clone(), notifier.clone());
        let dispatcher = Arc::new(
            PushDispatcher::new(cache.clone(), notifier.clone())
                .with_viewer(config.viewer_id.clone())
                .with_response_placement(config.response_placement),
        );
        let subscriptions = SubscriptionManager::new(connector, dispatcher.clone());
        Self {
            config,
            cache,
            notifier,
            paginator,
            dispatcher,
            subscriptions,
            source,
            writer,
        }
    }

    /// Engine talking to the REST API and WebSocket named in `config`.
    pub fn from_config(config: SyncConfig) -> Self {
        let mut backend = HttpPageSource::new(config.api_base.clone());
        if let Some(token) = &config.csrf_token {
            backend = backend.with_csrf_token(token.clone());
        }
        if let Some(cookie) = &config.session_cookie {
            backend = backend.with_session_cookie(cookie.clone());
        }
        let connector = Arc::new(WebSocketConnector::new(&config.ws_url));
        Self::new(config, Arc::new(backend), connector)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &PushDispatcher {
        &self.dispatcher
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub async fn request_next_page(&self, key: &PartitionKey) -> FetchStatus {
        self.paginator
            .fetch_next_page(key, self.source.as_ref())
            .await
    }

    /// Merges a fresh snapshot of a target's reactions from the server.
    ///
    /// Deltas that arrive while the snapshot is in flight are kept over the
    /// snapshot's view of the same ids. Returns `Ok(None)` when the
    /// collection was cleared, or another snapshot started, before this one
    /// landed.
    pub async fn load_reactions(&self, target: &ReactionKey) -> Result<Option<usize>, FetchError> {
        let token = self.cache.lock().begin_reaction_snapshot(target);
        let _window = OpenSnapshot {
            cache: &self.cache,
            key: target,
            token,
        };
        let reactions = self.source.fetch_reactions(target).await?;
        let merged = self
            .cache
            .lock()
            .merge_reaction_snapshot(target, token, reactions);
        match merged {
            Some(count) => {
                self.notifier
                    .emit(CacheEvent::ReactionsChanged(target.clone()));
                debug!(target = %target, count, "reactions loaded");
            }
            None => debug!(target = %target, "reaction snapshot superseded; dropped"),
        }
        Ok(merged)
    }

    /// Publishes a request. The server's copy is merged like a pushed
    /// `new-request`, so a push echo of the same id is a no-op.
    pub async fn submit_request(&self, draft: &RequestDraft) -> Result<Request, FetchError> {
        let created = self.writer.create_request(draft).await?;
        self.dispatcher.apply(Delta::NewRequest(created.clone()));
        Ok(created)
    }

    pub async fn update_request(&self, id: &str, draft: &RequestDraft) -> Result<Request, FetchError> {
        let updated = self.writer.update_request(id, draft).await?;
        self.dispatcher.apply(Delta::UpdateRequest(updated.clone()));
        Ok(updated)
    }

    pub async fn delete_request(&self, id: &str) -> Result<(), FetchError> {
        self.writer.delete_request(id).await?;
        self.dispatcher
            .apply(Delta::DeleteRequest(RequestRef { id: id.to_string() }));
        Ok(())
    }

    pub async fn respond_to_request(
        &self,
        request_id: &str,
        draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        let created = self.writer.create_response(request_id, draft).await?;
        self.dispatcher.apply(Delta::NewResponse(created.clone()));
        Ok(created)
    }

    pub async fn update_response(
        &self,
        id: &str,
        draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        let updated = self.writer.update_response(id, draft).await?;
        self.dispatcher.apply(Delta::UpdateResponse(updated.clone()));
        Ok(updated)
    }

    /// Deletes a response from whichever list holds it.
    pub async fn delete_response(&self, id: &str) -> Result<(), FetchError> {
        self.writer.delete_response(id).await?;
        let parent = self
            .cache
            .lock()
            .response(id)
            .map(|response| response.parent_request_id.clone());
        match parent {
            Some(parent_request_id) => {
                self.dispatcher.apply(Delta::DeleteResponse(ResponseRef {
                    id: id.to_string(),
                    parent_request_id,
                }));
            }
            None => {
                self.clear_reactions(&ReactionKey::response(id));
            }
        }
        Ok(())
    }

    pub async fn react(&self, target: &ReactionKey, draft: &ReactionDraft) -> Result<Reaction, FetchError> {
        let created = self.writer.create_reaction(target, draft).await?;
        let delta = match target.kind {
            EntityKind::Request => Delta::NewRequestReaction(created.clone()),
            EntityKind::Response => Delta::NewResponseReaction(created.clone()),
        };
        self.dispatcher.apply(delta);
        Ok(created)
    }

    pub async fn delete_reaction(&self, target: &ReactionKey, id: &str) -> Result<(), FetchError> {
        self.writer.delete_reaction(target, id).await?;
        let reference = ReactionRef {
            id: id.to_string(),
            target_id: target.target_id.clone(),
        };
        let delta = match target.kind {
            EntityKind::Request => Delta::DeleteRequestReaction(reference),
            EntityKind::Response => Delta::DeleteResponseReaction(reference),
        };
        self.dispatcher.apply(delta);
        Ok(())
    }

    pub async fn subscribe_to_channel(&self, channel: impl Into<Channel>) -> ChannelGuard {
        self.subscriptions.acquire(channel).await
    }

    /// Drops one reference to `channel` without a guard.
    pub fn unsubscribe_from_channel(&self, channel: &str) {
        self.subscriptions.release(channel);
    }

    /// Drops a partition; the next fetch starts again at page zero.
    pub fn reset(&self, key: &PartitionKey) -> bool {
        let dropped = self.cache.lock().reset(key);
        if dropped {
            self.notifier
                .emit(CacheEvent::PartitionReset(key.clone()));
        }
        dropped
    }

    pub fn clear_reactions(&self, target: &ReactionKey) -> bool {
        let dropped = self.cache.lock().clear_reactions(target);
        if dropped {
            self.notifier
                .emit(CacheEvent::ReactionsChanged(target.clone()));
        }
        dropped
    }

    pub fn requests(&self, scope: FeedScope) -> Vec<Request> {
        self.cache.lock().requests(scope)
    }

    pub fn responses(&self, request_id: &str) -> Vec<Response> {
        self.cache.lock().responses(request_id)
    }

    pub fn reactions(&self, target: &ReactionKey) -> Vec<Reaction> {
        self.cache.lock().reactions(target)
    }

    /// Counts per reaction kind plus the configured viewer's own reaction.
    pub fn reaction_summary(&self, target: &ReactionKey) -> ReactionSummary {
        self.cache
            .lock()
            .reaction_summary(target, self.config.viewer_id.as_deref())
    }

    pub fn cursor(&self, key: &PartitionKey) -> Option<Cursor> {
        self.cache.lock().partition(key).map(|partition| partition.cursor())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscriptions.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.subscriptions.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.notifier.subscribe()
    }

    pub async fn reconnect(&self) -> Result<(), TransportError> {
        self.subscriptions.reconnect().await
    }

    /// Closes the push connection and forgets every channel reference.
    /// Cached data stays readable.
    pub fn shutdown(&self) {
        self.subscriptions.shutdown();
    }

    /// Push channel that keeps `view` live. The personal feed needs a viewer.
    pub fn channel_for(&self, view: &View) -> Option<Channel> {
        match view {
            View::Feed(FeedScope::Global) => Some(Channel::public(&self.config.public_scope)),
            View::Feed(FeedScope::Personal) => self.config.viewer_id.as_deref().map(Channel::user),
            View::Request(id) => Some(Channel::responses(id)),
            View::Reactions(target) => Some(Channel::reactions(target.kind, &target.target_id)),
        }
    }

    /// Subscribes the view's channel, then loads its first page (or reaction
    /// snapshot).
    pub async fn mount(&self, view: View) -> (MountedView, FetchStatus) {
        let guard = match self.channel_for(&view) {
            Some(channel) => Some(self.subscriptions.acquire(channel).await),
            None => {
                warn!(?view, "view has no push channel; it will not update live");
                None
            }
        };

        let status = match &view {
            View::Reactions(target) => match self.load_reactions(target).await {
                Ok(Some(added)) => FetchStatus::Loaded {
                    added,
                    exhausted: true,
                },
                Ok(None) => FetchStatus::Discarded,
                Err(err) => {
                    warn!(target = %target, error = %err, "reaction snapshot failed");
                    FetchStatus::Failed(err)
                }
            },
            other => match other.partition() {
                Some(key) => self.request_next_page(&key).await,
                None => FetchStatus::Exhausted,
            },
        };

        (MountedView { view, guard }, status)
    }

    fn clear_view(&self, view: &View) {
        match view {
            View::Reactions(target) => {
                self.clear_reactions(target);
            }
            other => {
                if let Some(key) = other.partition() {
                    self.reset(&key);
                }
            }
        }
    }
}
