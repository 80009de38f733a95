use async_trait::async_trait;
use feed_protocol::{
    Page, Reaction, ReactionDraft, Request, RequestDraft, Response, ResponseDraft,
};

use crate::error::FetchError;
use crate::keys::{FeedScope, ReactionKey};

/// Paged read side of the backend. Pages are zero-based.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_requests(&self, scope: FeedScope, page: u32) -> Result<Page<Request>, FetchError>;

    async fn fetch_responses(&self, request_id: &str, page: u32)
        -> Result<Page<Response>, FetchError>;

    /// Full reaction snapshot for one target.
    async fn fetch_reactions(&self, target: &ReactionKey) -> Result<Vec<Reaction>, FetchError>;
}

/// Write side of the backend. Creates and edits return the server's copy of
/// the entity.
#[async_trait]
pub trait FeedWriter: Send + Sync {
    async fn create_request(&self, draft: &RequestDraft) -> Result<Request, FetchError>;

    async fn update_request(&self, id: &str, draft: &RequestDraft) -> Result<Request, FetchError>;

    async fn delete_request(&self, id: &str) -> Result<(), FetchError>;

    async fn create_response(
        &self,
        request_id: &str,
        draft: &ResponseDraft,
    ) -> Result<Response, FetchError>;

    async fn update_response(&self, id: &str, draft: &ResponseDraft)
        -> Result<Response, FetchError>;

    async fn delete_response(&self, id: &str) -> Result<(), FetchError>;

    async fn create_reaction(
        &self,
        target: &ReactionKey,
        draft: &ReactionDraft,
    ) -> Result<Reaction, FetchError>;

    async fn delete_reaction(&self, target: &ReactionKey, id: &str) -> Result<(), FetchError>;
}
