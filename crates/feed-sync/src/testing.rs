use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_protocol::{
    EntityId, Page, Reaction, ReactionDraft, ReactionType, Request, RequestDraft, Response,
    ResponseDraft,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::FetchError;
use crate::keys::{FeedScope, ReactionKey};
use crate::source::{FeedWriter, PageSource};

fn at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

pub fn request(id: &str, author: &str) -> Request {
    Request {
        id: id.to_string(),
        author: author.to_string(),
        body: format!("body of {id}"),
        created_at: at(),
        editable_by_viewer: false,
    }
}

pub fn response(id: &str, parent: &str) -> Response {
    Response {
        id: id.to_string(),
        parent_request_id: parent.to_string(),
        author: "bo".to_string(),
        body: format!("reply {id}"),
        created_at: at(),
    }
}

pub fn reaction(id: &str, key: &ReactionKey, author: &str, kind: ReactionType) -> Reaction {
    Reaction {
        id: id.to_string(),
        target_id: key.target_id.clone(),
        target_kind: key.kind,
        author: author.to_string(),
        reaction_type: kind,
    }
}

pub fn page<T>(items: Vec<T>, offset: u64, total: u64) -> Page<T> {
    Page {
        items,
        offset,
        total,
    }
}

/// In-memory backend that serves queued pages, answers writes with queued
/// server copies and counts calls. With a gate, every call waits for one
/// permit before answering.
#[derive(Default)]
pub struct ScriptedSource {
    requests: Mutex<HashMap<FeedScope, VecDeque<Result<Page<Request>, FetchError>>>>,
    responses: Mutex<HashMap<EntityId, VecDeque<Page<Response>>>>,
    reactions: Mutex<HashMap<ReactionKey, Vec<Reaction>>>,
    requested_pages: Mutex<Vec<u32>>,
    request_echoes: Mutex<VecDeque<Request>>,
    response_echoes: Mutex<VecDeque<Response>>,
    reaction_echoes: Mutex<VecDeque<Reaction>>,
    writes: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let source = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (source, gate)
    }

    pub fn push_requests(&self, scope: FeedScope, page: Page<Request>) {
        self.requests
            .lock()
            .entry(scope)
            .or_default()
            .push_back(Ok(page));
    }

    pub fn fail_requests(&self, scope: FeedScope, reason: &str) {
        self.requests
            .lock()
            .entry(scope)
            .or_default()
            .push_back(Err(FetchError::Source(reason.to_string())));
    }

    pub fn push_responses(&self, request_id: &str, page: Page<Response>) {
        self.responses
            .lock()
            .entry(request_id.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn set_reactions(&self, key: ReactionKey, reactions: Vec<Reaction>) {
        self.reactions.lock().insert(key, reactions);
    }

    /// Server copy returned by the next request create or update.
    pub fn echo_request(&self, request: Request) {
        self.request_echoes.lock().push_back(request);
    }

    pub fn echo_response(&self, response: Response) {
        self.response_echoes.lock().push_back(response);
    }

    pub fn echo_reaction(&self, reaction: Reaction) {
        self.reaction_echoes.lock().push_back(reaction);
    }

    /// Writes received, as `METHOD path`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    async fn record(&self, write: String) {
        self.writes.lock().push(write);
        self.enter().await;
    }

    /// Feed page indices asked for, in call order.
    pub fn requested_pages(&self) -> Vec<u32> {
        self.requested_pages.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_requests(&self, scope: FeedScope, page: u32) -> Result<Page<Request>, FetchError> {
        self.requested_pages.lock().push(page);
        self.enter().await;
        self.requests
            .lock()
            .get_mut(&scope)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(FetchError::Source("no page scripted".into())))
    }

    async fn fetch_responses(
        &self,
        request_id: &str,
        _page: u32,
    ) -> Result<Page<Response>, FetchError> {
        self.enter().await;
        self.responses
            .lock()
            .get_mut(request_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| FetchError::Source("no page scripted".into()))
    }

    async fn fetch_reactions(&self, target: &ReactionKey) -> Result<Vec<Reaction>, FetchError> {
        self.enter().await;
        Ok(self.reactions.lock().get(target).cloned().unwrap_or_default())
    }
}

fn echo<T>(queue: &Mutex<VecDeque<T>>) -> Result<T, FetchError> {
    queue
        .lock()
        .pop_front()
        .ok_or_else(|| FetchError::Source("no echo scripted".into()))
}

#[async_trait]
impl FeedWriter for ScriptedSource {
    async fn create_request(&self, _draft: &RequestDraft) -> Result<Request, FetchError> {
        self.record("POST /api/prayers".into()).await;
        echo(&self.request_echoes)
    }

    async fn update_request(&self, id: &str, _draft: &RequestDraft) -> Result<Request, FetchError> {
        self.record(format!("PUT /api/prayers/{id}")).await;
        echo(&self.request_echoes)
    }

    async fn delete_request(&self, id: &str) -> Result<(), FetchError> {
        self.record(format!("DELETE /api/prayers/{id}")).await;
        Ok(())
    }

    async fn create_response(
        &self,
        request_id: &str,
        _draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        self.record(format!("POST /api/prayers/{request_id}/responses")).await;
        echo(&self.response_echoes)
    }

    async fn update_response(
        &self,
        id: &str,
        _draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        self.record(format!("PUT /api/responses/{id}")).await;
        echo(&self.response_echoes)
    }

    async fn delete_response(&self, id: &str) -> Result<(), FetchError> {
        self.record(format!("DELETE /api/responses/{id}")).await;
        Ok(())
    }

    async fn create_reaction(
        &self,
        target: &ReactionKey,
        _draft: &ReactionDraft,
    ) -> Result<Reaction, FetchError> {
        self.record(format!("POST {target}")).await;
        echo(&self.reaction_echoes)
    }

    async fn delete_reaction(&self, target: &ReactionKey, id: &str) -> Result<(), FetchError> {
        self.record(format!("DELETE {target}/{id}")).await;
        Ok(())
    }
}
