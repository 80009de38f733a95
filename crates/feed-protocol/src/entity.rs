use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, globally unique identifier assigned by the server.
pub type EntityId = String;

/// Anything the cache stores by id.
pub trait Entity {
    fn id(&self) -> &str;
}

/// Kinds of entity a reaction can target. Also used as the channel prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Request,
    Response,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Request => "request",
            EntityKind::Response => "response",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A top-level post in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: EntityId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "editable")]
    pub editable_by_viewer: bool,
}

/// A reply owned by exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: EntityId,
    #[serde(alias = "requestId")]
    pub parent_request_id: EntityId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: EntityId,
    #[serde(alias = "requestId", alias = "responseId")]
    pub target_id: EntityId,
    pub target_kind: EntityKind,
    pub author: String,
    pub reaction_type: ReactionType,
}

/// Reaction vocabulary offered by the UI. Kinds this build does not know
/// about are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReactionType {
    Pray,
    Peace,
    Hope,
    Love,
    Thanks,
    Other(String),
}

impl ReactionType {
    pub const KNOWN: [ReactionType; 5] = [
        ReactionType::Pray,
        ReactionType::Peace,
        ReactionType::Hope,
        ReactionType::Love,
        ReactionType::Thanks,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ReactionType::Pray => "pray",
            ReactionType::Peace => "peace",
            ReactionType::Hope => "hope",
            ReactionType::Love => "love",
            ReactionType::Thanks => "thanks",
            ReactionType::Other(other) => other,
        }
    }

    /// Emoji shown next to the count.
    pub fn glyph(&self) -> &'static str {
        match self {
            ReactionType::Pray => "🙏",
            ReactionType::Peace => "✌️",
            ReactionType::Hope => "🤞",
            ReactionType::Love => "❤️",
            ReactionType::Thanks => "😊",
            ReactionType::Other(_) => "•",
        }
    }
}

impl From<String> for ReactionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pray" => ReactionType::Pray,
            "peace" => ReactionType::Peace,
            "hope" => ReactionType::Hope,
            "love" => ReactionType::Love,
            "thanks" => ReactionType::Thanks,
            _ => ReactionType::Other(value),
        }
    }
}

impl From<ReactionType> for String {
    fn from(value: ReactionType) -> Self {
        match value {
            ReactionType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Reaction {
    /// Decodes a reaction whose target kind is known from where it arrived.
    /// A payload without `targetKind` is given `kind`.
    pub fn decode_for(kind: EntityKind, mut value: Value) -> Result<Self, serde_json::Error> {
        stamp_target_kind(&mut value, kind);
        serde_json::from_value(value)
    }
}

pub(crate) fn stamp_target_kind(value: &mut Value, kind: EntityKind) {
    if let Some(fields) = value.as_object_mut() {
        fields
            .entry("targetKind")
            .or_insert_with(|| Value::from(kind.as_str()));
    }
}

impl Entity for Request {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Response {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Reaction {
    fn id(&self) -> &str {
        &self.id
    }
}
