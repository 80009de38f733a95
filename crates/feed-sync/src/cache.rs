//! Normalized in-memory store for requests, responses and reactions.
//!
//! Entities live once in per-kind maps; partitions only hold ordered ids.
//! All mutation is synchronous and keyed by id, so replaying a mutation is a
//! no-op beyond its first application.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use feed_protocol::{Entity, EntityId, EntityKind, Reaction, ReactionType, Request, Response};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::keys::{FeedScope, PartitionKey, ReactionKey};

/// The one cache instance shared by the paginator, dispatcher and engine.
/// The lock is never held across an await point.
pub type SharedCache = Arc<Mutex<EntityCache>>;

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A partition gained the id.
    Inserted,
    /// The id was already placed; its stored value changed.
    Updated,
    /// Same id, same payload.
    Unchanged,
    /// No live partition references the id, so nothing was stored.
    Skipped,
}

impl Upsert {
    pub fn changed(self) -> bool {
        matches!(self, Upsert::Inserted | Upsert::Updated)
    }
}

/// Where an id not yet present in a partition is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Head,
    Tail,
    /// Only update entities already present; never add ids.
    InPlace,
}

/// Pull-fetch progress of a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Zero-based index of the next page to request.
    pub next_page: u32,
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct Partition {
    items: IndexSet<EntityId>,
    cursor: Cursor,
    epoch: u64,
}

impl Partition {
    fn new(epoch: u64) -> Self {
        Self {
            items: IndexSet::new(),
            cursor: Cursor::default(),
            epoch,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Changes every time the partition is recreated after a reset.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn place(&mut self, id: &str, placement: Placement) -> bool {
        if self.items.contains(id) {
            return false;
        }
        match placement {
            Placement::Head => {
                self.items.shift_insert(0, id.to_string());
                true
            }
            Placement::Tail => self.items.insert(id.to_string()),
            Placement::InPlace => false,
        }
    }
}

/// Per-kind entity maps.
#[derive(Debug, Default)]
pub struct Entities {
    requests: HashMap<EntityId, Request>,
    responses: HashMap<EntityId, Response>,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for feed_protocol::Request {}
    impl Sealed for feed_protocol::Response {}
}

/// Entity kinds that are listed in partitions.
pub trait Stored: Entity + Clone + PartialEq + sealed::Sealed {
    const KIND: EntityKind;
    fn map(entities: &Entities) -> &HashMap<EntityId, Self>;
    fn map_mut(entities: &mut Entities) -> &mut HashMap<EntityId, Self>;
}

impl Stored for Request {
    const KIND: EntityKind = EntityKind::Request;

    fn map(entities: &Entities) -> &HashMap<EntityId, Self> {
        &entities.requests
    }

    fn map_mut(entities: &mut Entities) -> &mut HashMap<EntityId, Self> {
        &mut entities.requests
    }
}

impl Stored for Response {
    const KIND: EntityKind = EntityKind::Response;

    fn map(entities: &Entities) -> &HashMap<EntityId, Self> {
        &entities.responses
    }

    fn map_mut(entities: &mut Entities) -> &mut HashMap<EntityId, Self> {
        &mut entities.responses
    }
}

/// One target's reactions, plus the ids deltas touched while a snapshot of
/// the target was in flight.
#[derive(Debug, Default)]
struct ReactionSet {
    items: IndexMap<EntityId, Reaction>,
    pending: Option<SnapshotWindow>,
}

#[derive(Debug)]
struct SnapshotWindow {
    token: u64,
    upserted: HashSet<EntityId>,
    removed: HashSet<EntityId>,
}

/// Per-kind reaction counts for one target plus the viewer's own reaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactionSummary {
    pub counts: BTreeMap<ReactionType, usize>,
    pub mine: Option<Reaction>,
}

impl ReactionSummary {
    pub fn count(&self, kind: &ReactionType) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    entities: Entities,
    partitions: HashMap<PartitionKey, Partition>,
    reactions: HashMap<ReactionKey, ReactionSet>,
    next_epoch: u64,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn partition(&self, key: &PartitionKey) -> Option<&Partition> {
        self.partitions.get(key)
    }

    pub fn is_exhausted(&self, key: &PartitionKey) -> bool {
        self.partitions
            .get(key)
            .is_some_and(|partition| partition.cursor.exhausted)
    }

    /// Returns the partition for `key`, creating an empty one on first use.
    pub fn open_partition(&mut self, key: &PartitionKey) -> &mut Partition {
        let next_epoch = &mut self.next_epoch;
        self.partitions.entry(key.clone()).or_insert_with(|| {
            *next_epoch += 1;
            Partition::new(*next_epoch)
        })
    }

    /// Drops a partition and every entity no other partition still lists.
    pub fn reset(&mut self, key: &PartitionKey) -> bool {
        let Some(partition) = self.partitions.remove(key) else {
            return false;
        };
        let kind = key.kind();
        for id in partition.items {
            self.release_entity(kind, &id);
        }
        true
    }

    /// Inserts or overwrites `entity` by id across the given partitions.
    ///
    /// Partitions that do not exist yet are left alone. An id already listed
    /// keeps its position; only its stored value is replaced.
    pub fn upsert<T: Stored>(
        &mut self,
        keys: &[PartitionKey],
        entity: T,
        placement: Placement,
    ) -> Upsert {
        let id = entity.id().to_string();
        let mut inserted = false;
        let mut referenced = false;
        for key in keys.iter().filter(|key| key.kind() == T::KIND) {
            if let Some(partition) = self.partitions.get_mut(key) {
                inserted |= partition.place(&id, placement);
                referenced |= partition.contains(&id);
            }
        }

        let store = T::map_mut(&mut self.entities);
        if !referenced && !store.contains_key(&id) {
            return Upsert::Skipped;
        }
        let unchanged = store.get(&id) == Some(&entity);
        if !unchanged {
            store.insert(id, entity);
        }
        match (inserted, unchanged) {
            (true, _) => Upsert::Inserted,
            (false, true) => Upsert::Unchanged,
            (false, false) => Upsert::Updated,
        }
    }

    /// Drops `id` from one partition. Absent ids are not an error.
    pub fn remove(&mut self, key: &PartitionKey, id: &str) -> bool {
        let removed = self
            .partitions
            .get_mut(key)
            .is_some_and(|partition| partition.items.shift_remove(id));
        if removed {
            self.release_entity(key.kind(), id);
        }
        removed
    }

    /// Appends a fetched page to the tail of a partition, skipping ids it
    /// already lists, then moves the cursor.
    ///
    /// Returns `None` when the partition was reset since `epoch` was read.
    pub fn merge_page<T: Stored>(
        &mut self,
        key: &PartitionKey,
        epoch: u64,
        items: Vec<T>,
        cursor: Cursor,
    ) -> Option<usize> {
        let partition = self
            .partitions
            .get_mut(key)
            .filter(|partition| partition.epoch == epoch)?;
        let store = T::map_mut(&mut self.entities);
        let mut added = 0;
        for item in items {
            if partition.place(item.id(), Placement::Tail) {
                added += 1;
            }
            // A pushed copy may be newer than the page.
            store.entry(item.id().to_string()).or_insert(item);
        }
        partition.cursor = cursor;
        Some(added)
    }

    pub fn items<T: Stored>(&self, key: &PartitionKey) -> Vec<T> {
        let store = T::map(&self.entities);
        self.partitions
            .get(key)
            .map(|partition| {
                partition
                    .ids()
                    .filter_map(|id| store.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn requests(&self, scope: FeedScope) -> Vec<Request> {
        self.items(&PartitionKey::Feed(scope))
    }

    pub fn responses(&self, request_id: &str) -> Vec<Response> {
        self.items(&PartitionKey::responses(request_id))
    }

    pub fn request(&self, id: &str) -> Option<&Request> {
        self.entities.requests.get(id)
    }

    pub fn response(&self, id: &str) -> Option<&Response> {
        self.entities.responses.get(id)
    }

    /// Keys of every live partition of `kind` that lists `id`.
    pub fn partitions_containing(&self, kind: EntityKind, id: &str) -> Vec<PartitionKey> {
        self.partitions
            .iter()
            .filter(|(key, partition)| key.kind() == kind && partition.contains(id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn upsert_reaction(&mut self, key: ReactionKey, reaction: Reaction) -> Upsert {
        let set = self.reactions.entry(key).or_default();
        if let Some(window) = &mut set.pending {
            window.removed.remove(&reaction.id);
            window.upserted.insert(reaction.id.clone());
        }
        let existing = set
            .items
            .get(&reaction.id)
            .map(|current| *current == reaction);
        match existing {
            Some(true) => Upsert::Unchanged,
            Some(false) => {
                set.items.insert(reaction.id.clone(), reaction);
                Upsert::Updated
            }
            None => {
                set.items.insert(reaction.id.clone(), reaction);
                Upsert::Inserted
            }
        }
    }

    /// Drops one reaction. A collection left empty is forgotten unless a
    /// snapshot of it is in flight.
    pub fn remove_reaction(&mut self, key: &ReactionKey, id: &str) -> bool {
        let Some(set) = self.reactions.get_mut(key) else {
            return false;
        };
        if let Some(window) = &mut set.pending {
            window.upserted.remove(id);
            window.removed.insert(id.to_string());
        }
        let removed = set.items.shift_remove(id).is_some();
        if set.items.is_empty() && set.pending.is_none() {
            self.reactions.remove(key);
        }
        removed
    }

    /// Opens a snapshot window on a target's reactions. Deltas applied until
    /// the snapshot is merged win over what the snapshot says about the same
    /// ids.
    pub fn begin_reaction_snapshot(&mut self, key: &ReactionKey) -> u64 {
        self.next_epoch += 1;
        let token = self.next_epoch;
        self.reactions.entry(key.clone()).or_default().pending = Some(SnapshotWindow {
            token,
            upserted: HashSet::new(),
            removed: HashSet::new(),
        });
        token
    }

    /// Merges a fetched snapshot by id and closes its window.
    ///
    /// The snapshot decides membership for ids no delta touched meanwhile.
    /// Returns `None` when the collection was cleared or a newer snapshot
    /// was started since `token` was issued.
    pub fn merge_reaction_snapshot(
        &mut self,
        key: &ReactionKey,
        token: u64,
        reactions: Vec<Reaction>,
    ) -> Option<usize> {
        let set = self.reactions.get_mut(key)?;
        if set.pending.as_ref().map(|window| window.token) != Some(token) {
            return None;
        }
        let window = set.pending.take()?;

        let mut merged = IndexMap::with_capacity(reactions.len());
        for reaction in reactions {
            if window.removed.contains(&reaction.id) {
                continue;
            }
            let reaction = if window.upserted.contains(&reaction.id) {
                set.items.get(&reaction.id).cloned().unwrap_or(reaction)
            } else {
                reaction
            };
            merged.insert(reaction.id.clone(), reaction);
        }
        for (id, reaction) in &set.items {
            if window.upserted.contains(id) && !merged.contains_key(id) {
                merged.insert(id.clone(), reaction.clone());
            }
        }
        set.items = merged;
        Some(set.items.len())
    }

    /// Closes the window `token` opened without merging anything. No-op once
    /// the window was merged or replaced.
    pub fn end_reaction_snapshot(&mut self, key: &ReactionKey, token: u64) {
        let Some(set) = self.reactions.get_mut(key) else {
            return;
        };
        if set.pending.as_ref().map(|window| window.token) != Some(token) {
            return;
        }
        set.pending = None;
        if set.items.is_empty() {
            self.reactions.remove(key);
        }
    }

    pub fn clear_reactions(&mut self, key: &ReactionKey) -> bool {
        self.reactions.remove(key).is_some()
    }

    pub fn reactions(&self, key: &ReactionKey) -> Vec<Reaction> {
        self.reactions
            .get(key)
            .map(|set| set.items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn reaction_summary(&self, key: &ReactionKey, viewer: Option<&str>) -> ReactionSummary {
        let mut summary = ReactionSummary::default();
        let Some(set) = self.reactions.get(key) else {
            return summary;
        };
        for reaction in set.items.values() {
            *summary
                .counts
                .entry(reaction.reaction_type.clone())
                .or_insert(0) += 1;
            if summary.mine.is_none() && viewer == Some(reaction.author.as_str()) {
                summary.mine = Some(reaction.clone());
            }
        }
        summary
    }

    fn release_entity(&mut self, kind: EntityKind, id: &str) {
        let still_listed = self
            .partitions
            .iter()
            .any(|(key, partition)| key.kind() == kind && partition.contains(id));
        if still_listed {
            return;
        }
        match kind {
            EntityKind::Request => {
                self.entities.requests.remove(id);
            }
            EntityKind::Response => {
                self.entities.responses.remove(id);
            }
        }
    }

    /// Ids stored for `kind` that no partition lists. Always empty unless an
    /// invariant was broken.
    #[cfg(test)]
    fn orphans(&self, kind: EntityKind) -> HashSet<EntityId> {
        let listed: HashSet<&str> = self
            .partitions
            .iter()
            .filter(|(key, _)| key.kind() == kind)
            .flat_map(|(_, partition)| partition.ids())
            .collect();
        let stored: Vec<&EntityId> = match kind {
            EntityKind::Request => self.entities.requests.keys().collect(),
            EntityKind::Response => self.entities.responses.keys().collect(),
        };
        stored
            .into_iter()
            .filter(|id| !listed.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reaction, request, response};

    const GLOBAL: PartitionKey = PartitionKey::Feed(FeedScope::Global);
    const PERSONAL: PartitionKey = PartitionKey::Feed(FeedScope::Personal);

    fn ids(cache: &EntityCache, key: &PartitionKey) -> Vec<String> {
        cache
            .partition(key)
            .map(|p| p.ids().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn seeded(ids: &[&str]) -> EntityCache {
        let mut cache = EntityCache::new();
        let epoch = cache.open_partition(&GLOBAL).epoch();
        let items: Vec<_> = ids.iter().map(|id| request(id, "ana")).collect();
        cache.merge_page(&GLOBAL, epoch, items, Cursor::default());
        cache
    }

    #[test]
    fn repeated_upsert_is_a_noop() {
        let mut cache = seeded(&["a"]);
        let fresh = request("b", "bo");
        assert_eq!(
            cache.upsert(&[GLOBAL], fresh.clone(), Placement::Head),
            Upsert::Inserted
        );
        let after_first = ids(&cache, &GLOBAL);
        assert_eq!(
            cache.upsert(&[GLOBAL], fresh.clone(), Placement::Head),
            Upsert::Unchanged
        );
        assert_eq!(ids(&cache, &GLOBAL), after_first);
        assert_eq!(cache.request("b"), Some(&fresh));
    }

    #[test]
    fn pushed_copy_of_listed_id_updates_in_place() {
        let mut cache = seeded(&["A", "B", "C"]);
        let mut edited = request("B", "ana");
        edited.body = "edited".into();
        assert_eq!(
            cache.upsert(&[GLOBAL], edited, Placement::Head),
            Upsert::Updated
        );
        assert_eq!(ids(&cache, &GLOBAL), ["A", "B", "C"]);
        assert_eq!(cache.request("B").map(|r| r.body.as_str()), Some("edited"));
    }

    #[test]
    fn in_place_upsert_of_unknown_id_is_skipped() {
        let mut cache = seeded(&["A"]);
        assert_eq!(
            cache.upsert(&[GLOBAL], request("Z", "ana"), Placement::InPlace),
            Upsert::Skipped
        );
        assert!(cache.request("Z").is_none());
        assert_eq!(ids(&cache, &GLOBAL), ["A"]);
    }

    #[test]
    fn upsert_into_missing_partition_stores_nothing() {
        let mut cache = EntityCache::new();
        assert_eq!(
            cache.upsert(&[GLOBAL], request("A", "ana"), Placement::Head),
            Upsert::Skipped
        );
        assert!(cache.partition(&GLOBAL).is_none());
        assert!(cache.request("A").is_none());
    }

    #[test]
    fn merge_skips_ids_already_listed() {
        let mut cache = seeded(&["p1"]);
        let epoch = cache.partition(&GLOBAL).map(Partition::epoch).unwrap_or_default();
        let added = cache.merge_page(
            &GLOBAL,
            epoch,
            vec![request("p1", "ana"), request("p0", "ana")],
            Cursor {
                next_page: 2,
                exhausted: true,
            },
        );
        assert_eq!(added, Some(1));
        assert_eq!(ids(&cache, &GLOBAL), ["p1", "p0"]);
        assert!(cache.is_exhausted(&GLOBAL));
    }

    #[test]
    fn merge_into_reset_partition_is_refused() {
        let mut cache = seeded(&["p1"]);
        let stale = cache.partition(&GLOBAL).map(Partition::epoch).unwrap_or_default();
        assert!(cache.reset(&GLOBAL));
        let fresh = cache.open_partition(&GLOBAL).epoch();
        assert_ne!(stale, fresh);
        assert_eq!(
            cache.merge_page(&GLOBAL, stale, vec![request("p9", "ana")], Cursor::default()),
            None
        );
        assert!(cache.partition(&GLOBAL).is_some_and(Partition::is_empty));
    }

    #[test]
    fn remove_is_silent_for_absent_ids() {
        let mut cache = seeded(&["A"]);
        assert!(!cache.remove(&GLOBAL, "nope"));
        assert!(!cache.remove(&PERSONAL, "A"));
        assert!(cache.remove(&GLOBAL, "A"));
        assert!(cache.request("A").is_none());
    }

    #[test]
    fn shared_entity_survives_removal_from_one_feed() {
        let mut cache = seeded(&["A"]);
        cache.open_partition(&PERSONAL);
        cache.upsert(&[PERSONAL], request("A", "ana"), Placement::Tail);
        assert!(cache.remove(&GLOBAL, "A"));
        assert!(cache.request("A").is_some());
        assert_eq!(ids(&cache, &PERSONAL), ["A"]);
        assert!(cache.orphans(EntityKind::Request).is_empty());
    }

    #[test]
    fn reset_drops_unlisted_entities() {
        let mut cache = EntityCache::new();
        let key = PartitionKey::responses("r1");
        let epoch = cache.open_partition(&key).epoch();
        cache.merge_page(
            &key,
            epoch,
            vec![response("s1", "r1"), response("s2", "r1")],
            Cursor::default(),
        );
        assert_eq!(cache.responses("r1").len(), 2);
        assert!(cache.reset(&key));
        assert!(cache.response("s1").is_none());
        assert!(cache.responses("r1").is_empty());
        assert!(!cache.reset(&key));
    }

    #[test]
    fn reactions_are_unique_by_id() {
        let mut cache = EntityCache::new();
        let key = ReactionKey::request("r1");
        let pray = reaction("x1", &key, "ana", ReactionType::Pray);
        assert_eq!(cache.upsert_reaction(key.clone(), pray.clone()), Upsert::Inserted);
        assert_eq!(cache.upsert_reaction(key.clone(), pray), Upsert::Unchanged);
        let love = reaction("x1", &key, "ana", ReactionType::Love);
        assert_eq!(cache.upsert_reaction(key.clone(), love), Upsert::Updated);
        assert_eq!(cache.reactions(&key).len(), 1);
        assert!(cache.remove_reaction(&key, "x1"));
        assert!(!cache.remove_reaction(&key, "x1"));
        assert!(!cache.remove_reaction(&ReactionKey::response("s1"), "x1"));
        assert!(!cache.clear_reactions(&key), "emptied collection is forgotten");
    }

    #[test]
    fn snapshot_keeps_deltas_applied_while_in_flight() {
        let mut cache = EntityCache::new();
        let key = ReactionKey::request("r1");
        cache.upsert_reaction(key.clone(), reaction("x0", &key, "cy", ReactionType::Hope));
        let token = cache.begin_reaction_snapshot(&key);

        cache.upsert_reaction(key.clone(), reaction("x2", &key, "bo", ReactionType::Love));
        cache.upsert_reaction(key.clone(), reaction("x1", &key, "ana", ReactionType::Thanks));
        assert!(!cache.remove_reaction(&key, "x3"));

        let merged = cache.merge_reaction_snapshot(
            &key,
            token,
            vec![
                reaction("x1", &key, "ana", ReactionType::Pray),
                reaction("x3", &key, "dee", ReactionType::Peace),
            ],
        );
        assert_eq!(merged, Some(2));
        let held: Vec<(String, ReactionType)> = cache
            .reactions(&key)
            .into_iter()
            .map(|r| (r.id, r.reaction_type))
            .collect();
        assert_eq!(
            held,
            [
                ("x1".to_string(), ReactionType::Thanks),
                ("x2".to_string(), ReactionType::Love),
            ]
        );
    }

    #[test]
    fn superseded_or_cleared_snapshot_is_dropped() {
        let mut cache = EntityCache::new();
        let key = ReactionKey::response("s1");
        let first = cache.begin_reaction_snapshot(&key);
        let second = cache.begin_reaction_snapshot(&key);
        let stale = vec![reaction("x1", &key, "ana", ReactionType::Pray)];
        assert_eq!(cache.merge_reaction_snapshot(&key, first, stale), None);
        assert_eq!(cache.merge_reaction_snapshot(&key, second, Vec::new()), Some(0));

        let third = cache.begin_reaction_snapshot(&key);
        assert!(cache.clear_reactions(&key));
        let late = vec![reaction("x1", &key, "ana", ReactionType::Pray)];
        assert_eq!(cache.merge_reaction_snapshot(&key, third, late), None);
        assert!(cache.reactions(&key).is_empty());
    }

    #[test]
    fn abandoned_snapshot_forgets_empty_collection() {
        let mut cache = EntityCache::new();
        let key = ReactionKey::request("r1");
        let token = cache.begin_reaction_snapshot(&key);
        cache.end_reaction_snapshot(&key, token);
        assert!(!cache.clear_reactions(&key));
    }

    #[test]
    fn summary_counts_kinds_and_finds_viewer() {
        let mut cache = EntityCache::new();
        let key = ReactionKey::response("s1");
        let token = cache.begin_reaction_snapshot(&key);
        cache.merge_reaction_snapshot(
            &key,
            token,
            vec![
                reaction("x1", &key, "ana", ReactionType::Pray),
                reaction("x2", &key, "bo", ReactionType::Pray),
                reaction("x3", &key, "cy", ReactionType::Hope),
            ],
        );
        let summary = cache.reaction_summary(&key, Some("bo"));
        assert_eq!(summary.count(&ReactionType::Pray), 2);
        assert_eq!(summary.count(&ReactionType::Hope), 1);
        assert_eq!(summary.count(&ReactionType::Love), 0);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.mine.map(|r| r.id), Some("x2".to_string()));
    }
}
