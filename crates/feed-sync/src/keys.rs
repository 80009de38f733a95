use std::fmt;

use feed_protocol::{EntityId, EntityKind, Reaction};

/// Which request feed a partition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedScope {
    /// Everyone's requests.
    Global,
    /// Requests in the viewer's own feed.
    Personal,
}

impl FeedScope {
    pub const ALL: [FeedScope; 2] = [FeedScope::Global, FeedScope::Personal];
}

/// Names one independently paginated slice of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Feed(FeedScope),
    /// Responses owned by one request, oldest first.
    Responses(EntityId),
}

impl PartitionKey {
    pub fn responses(request_id: impl Into<EntityId>) -> Self {
        PartitionKey::Responses(request_id.into())
    }

    /// Kind of entity whose ids the partition lists.
    pub fn kind(&self) -> EntityKind {
        match self {
            PartitionKey::Feed(_) => EntityKind::Request,
            PartitionKey::Responses(_) => EntityKind::Response,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Feed(FeedScope::Global) => f.write_str("feed/global"),
            PartitionKey::Feed(FeedScope::Personal) => f.write_str("feed/personal"),
            PartitionKey::Responses(id) => write!(f, "responses/{id}"),
        }
    }
}

/// Names the reaction collection of one request or response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReactionKey {
    pub kind: EntityKind,
    pub target_id: EntityId,
}

impl ReactionKey {
    pub fn request(id: impl Into<EntityId>) -> Self {
        Self {
            kind: EntityKind::Request,
            target_id: id.into(),
        }
    }

    pub fn response(id: impl Into<EntityId>) -> Self {
        Self {
            kind: EntityKind::Response,
            target_id: id.into(),
        }
    }

    pub fn of(reaction: &Reaction) -> Self {
        Self {
            kind: reaction.target_kind,
            target_id: reaction.target_id.clone(),
        }
    }
}

impl fmt::Display for ReactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/reactions", self.kind, self.target_id)
    }
}
