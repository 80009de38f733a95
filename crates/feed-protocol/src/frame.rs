use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{stamp_target_kind, EntityId, EntityKind, Reaction, Request, Response};

/// Outbound frames the client sends to manage its channel interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl ControlFrame {
    pub fn channel(&self) -> &str {
        match self {
            ControlFrame::Subscribe { channel } | ControlFrame::Unsubscribe { channel } => channel,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRef {
    pub id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRef {
    pub id: EntityId,
    #[serde(alias = "requestId")]
    pub parent_request_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRef {
    pub id: EntityId,
    #[serde(alias = "requestId", alias = "responseId")]
    pub target_id: EntityId,
}

/// A single create/update/delete event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Delta {
    NewRequest(Request),
    UpdateRequest(Request),
    DeleteRequest(RequestRef),
    NewRequestReaction(Reaction),
    DeleteRequestReaction(ReactionRef),
    NewResponse(Response),
    UpdateResponse(Response),
    DeleteResponse(ResponseRef),
    NewResponseReaction(Reaction),
    DeleteResponseReaction(ReactionRef),
}

impl Delta {
    /// Every `type` tag this build understands.
    pub const KINDS: [&'static str; 10] = [
        "new-request",
        "update-request",
        "delete-request",
        "new-request-reaction",
        "delete-request-reaction",
        "new-response",
        "update-response",
        "delete-response",
        "new-response-reaction",
        "delete-response-reaction",
    ];

    /// Target kind implied by a reaction-creating `type` tag.
    fn reaction_target(kind: &str) -> Option<EntityKind> {
        match kind {
            "new-request-reaction" => Some(EntityKind::Request),
            "new-response-reaction" => Some(EntityKind::Response),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Delta::NewRequest(_) => "new-request",
            Delta::UpdateRequest(_) => "update-request",
            Delta::DeleteRequest(_) => "delete-request",
            Delta::NewRequestReaction(_) => "new-request-reaction",
            Delta::DeleteRequestReaction(_) => "delete-request-reaction",
            Delta::NewResponse(_) => "new-response",
            Delta::UpdateResponse(_) => "update-response",
            Delta::DeleteResponse(_) => "delete-response",
            Delta::NewResponseReaction(_) => "new-response-reaction",
            Delta::DeleteResponseReaction(_) => "delete-response-reaction",
        }
    }
}

/// Result of decoding an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Delta(Delta),
    /// Well-formed frame whose `type` is not in [`Delta::KINDS`].
    Unknown { kind: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no type tag")]
    MissingType,
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn decode_inbound(text: &str) -> Result<Inbound, DecodeError> {
    let mut value: serde_json::Value =
        serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();
    if !Delta::KINDS.contains(&kind.as_str()) {
        return Ok(Inbound::Unknown { kind });
    }
    if let Some(target) = Delta::reaction_target(&kind) {
        if let Some(payload) = value.get_mut("payload") {
            stamp_target_kind(payload, target);
        }
    }
    serde_json::from_value(value)
        .map(Inbound::Delta)
        .map_err(|source| DecodeError::Payload { kind, source })
}
