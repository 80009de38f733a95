use feed_protocol::{decode_inbound, Delta, EntityKind, Inbound, Request};
use tracing::{trace, warn};

use crate::cache::{EntityCache, Placement, SharedCache};
use crate::config::ResponsePlacement;
use crate::events::{CacheEvent, Notifier};
use crate::keys::{FeedScope, PartitionKey, ReactionKey};
use crate::subscription::InboundHandler;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Decoded and applied; `changed` is false when the delta was a replay or
    /// targeted nothing cached.
    Applied { kind: &'static str, changed: bool },
    /// Well-formed but of a type this build does not handle.
    Ignored { kind: String },
    /// Not decodable.
    Rejected,
}

/// Applies pushed deltas to the cache, one frame at a time.
pub struct PushDispatcher {
    cache: SharedCache,
    notifier: Notifier,
    viewer: Option<String>,
    response_placement: ResponsePlacement,
}

impl PushDispatcher {
    pub fn new(cache: SharedCache, notifier: Notifier) -> Self {
        Self {
            cache,
            notifier,
            viewer: None,
            response_placement: ResponsePlacement::default(),
        }
    }

    pub fn with_viewer(mut self, viewer: Option<String>) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn with_response_placement(mut self, placement: ResponsePlacement) -> Self {
        self.response_placement = placement;
        self
    }

    pub fn on_message(&self, raw: &str) -> Dispatch {
        match decode_inbound(raw) {
            Ok(Inbound::Delta(delta)) => {
                let kind = delta.kind();
                let changed = self.apply(delta);
                trace!(kind, changed, "push delta applied");
                Dispatch::Applied { kind, changed }
            }
            Ok(Inbound::Unknown { kind }) => {
                warn!(%kind, "dropping push frame of unknown type");
                Dispatch::Ignored { kind }
            }
            Err(err) => {
                warn!(error = %err, "dropping undecodable push frame");
                Dispatch::Rejected
            }
        }
    }

    /// Applies one delta and publishes the resulting change events.
    pub fn apply(&self, delta: Delta) -> bool {
        let events = {
            let mut cache = self.cache.lock();
            self.apply_locked(&mut cache, delta)
        };
        let changed = !events.is_empty();
        for event in events {
            self.notifier.emit(event);
        }
        changed
    }

    fn feeds_for(&self, request: &Request) -> Vec<PartitionKey> {
        let mut keys = vec![PartitionKey::Feed(FeedScope::Global)];
        if self.viewer.as_deref() == Some(request.author.as_str()) {
            keys.push(PartitionKey::Feed(FeedScope::Personal));
        }
        keys
    }

    fn apply_locked(&self, cache: &mut EntityCache, delta: Delta) -> Vec<CacheEvent> {
        match delta {
            Delta::NewRequest(request) => {
                let keys = self.feeds_for(&request);
                let id = request.id.clone();
                upserted(cache, &keys, request, Placement::Head, EntityKind::Request, &id)
            }
            Delta::UpdateRequest(request) => {
                let keys = all_feeds();
                let id = request.id.clone();
                upserted(cache, &keys, request, Placement::InPlace, EntityKind::Request, &id)
            }
            Delta::DeleteRequest(target) => {
                let mut events: Vec<CacheEvent> = all_feeds()
                    .into_iter()
                    .filter(|key| cache.remove(key, &target.id))
                    .map(CacheEvent::PartitionChanged)
                    .collect();
                events.extend(drop_request_dependents(cache, &target.id));
                events
            }
            Delta::NewResponse(response) => {
                let key = PartitionKey::responses(response.parent_request_id.clone());
                let placement = match self.response_placement {
                    ResponsePlacement::Append => Placement::Tail,
                    ResponsePlacement::WhenLoaded if cache.is_exhausted(&key) => Placement::Tail,
                    ResponsePlacement::WhenLoaded => Placement::InPlace,
                };
                let id = response.id.clone();
                upserted(cache, &[key], response, placement, EntityKind::Response, &id)
            }
            Delta::UpdateResponse(response) => {
                let key = PartitionKey::responses(response.parent_request_id.clone());
                let id = response.id.clone();
                upserted(cache, &[key], response, Placement::InPlace, EntityKind::Response, &id)
            }
            Delta::DeleteResponse(target) => {
                let key = PartitionKey::responses(target.parent_request_id);
                let mut events = Vec::new();
                if cache.remove(&key, &target.id) {
                    events.push(CacheEvent::PartitionChanged(key));
                }
                events.extend(cleared(cache, ReactionKey::response(target.id)));
                events
            }
            Delta::NewRequestReaction(reaction) => {
                let key = ReactionKey::request(reaction.target_id.clone());
                reaction_event(cache.upsert_reaction(key.clone(), reaction).changed(), key)
            }
            Delta::NewResponseReaction(reaction) => {
                let key = ReactionKey::response(reaction.target_id.clone());
                reaction_event(cache.upsert_reaction(key.clone(), reaction).changed(), key)
            }
            Delta::DeleteRequestReaction(target) => {
                let key = ReactionKey::request(target.target_id);
                reaction_event(cache.remove_reaction(&key, &target.id), key)
            }
            Delta::DeleteResponseReaction(target) => {
                let key = ReactionKey::response(target.target_id);
                reaction_event(cache.remove_reaction(&key, &target.id), key)
            }
        }
    }
}

impl InboundHandler for PushDispatcher {
    fn on_message(&self, raw: &str) {
        PushDispatcher::on_message(self, raw);
    }
}

fn all_feeds() -> Vec<PartitionKey> {
    FeedScope::ALL.into_iter().map(PartitionKey::Feed).collect()
}

fn upserted<T: crate::cache::Stored>(
    cache: &mut EntityCache,
    keys: &[PartitionKey],
    entity: T,
    placement: Placement,
    kind: EntityKind,
    id: &str,
) -> Vec<CacheEvent> {
    if !cache.upsert(keys, entity, placement).changed() {
        return Vec::new();
    }
    cache
        .partitions_containing(kind, id)
        .into_iter()
        .map(CacheEvent::PartitionChanged)
        .collect()
}

/// A deleted request takes its response list and every reaction collection
/// hanging off it along.
fn drop_request_dependents(cache: &mut EntityCache, request_id: &str) -> Vec<CacheEvent> {
    let responses = PartitionKey::responses(request_id);
    let response_ids: Vec<String> = cache
        .partition(&responses)
        .map(|partition| partition.ids().map(str::to_string).collect())
        .unwrap_or_default();

    let mut events = Vec::new();
    if cache.reset(&responses) {
        events.push(CacheEvent::PartitionReset(responses));
    }
    for response_id in response_ids {
        events.extend(cleared(cache, ReactionKey::response(response_id)));
    }
    events.extend(cleared(cache, ReactionKey::request(request_id)));
    events
}

fn cleared(cache: &mut EntityCache, key: ReactionKey) -> Vec<CacheEvent> {
    let dropped = cache.clear_reactions(&key);
    reaction_event(dropped, key)
}

fn reaction_event(changed: bool, key: ReactionKey) -> Vec<CacheEvent> {
    if changed {
        vec![CacheEvent::ReactionsChanged(key)]
    } else {
        Vec::new()
    }
}
