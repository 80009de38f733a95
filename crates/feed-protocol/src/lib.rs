//! Shared protocol definitions for the feed REST endpoints and the push channel.
//! Kept free of runtime dependencies so other clients can reuse the exact
//! shapes the sync engine decodes.

mod channel;
mod draft;
mod entity;
mod frame;
mod page;

pub use channel::Channel;
pub use draft::{ReactionDraft, RequestDraft, ResponseDraft};
pub use entity::{Entity, EntityId, EntityKind, Reaction, ReactionType, Request, Response};
pub use frame::{
    decode_inbound, ControlFrame, DecodeError, Delta, Inbound, ReactionRef, RequestRef,
    ResponseRef,
};
pub use page::Page;
