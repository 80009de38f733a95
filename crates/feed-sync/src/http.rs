use async_trait::async_trait;
use feed_protocol::{
    EntityKind, Page, Reaction, ReactionDraft, Request, RequestDraft, Response, ResponseDraft,
};
use reqwest::header::COOKIE;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;
use crate::keys::{FeedScope, ReactionKey};
use crate::source::{FeedWriter, PageSource};

/// Header the API checks on every state-changing call.
pub const CSRF_HEADER: &str = "Csrf-Token";

/// [`PageSource`] and [`FeedWriter`] backed by the feed's REST API.
#[derive(Clone)]
pub struct HttpPageSource {
    http: Client,
    base_url: String,
    csrf_token: Option<String>,
    session_cookie: Option<String>,
}

impl HttpPageSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            csrf_token: None,
            session_cookie: None,
        }
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "calling api");
        let mut req = self.http.request(method, url);
        if let Some(cookie) = &self.session_cookie {
            req = req.header(COOKIE, cookie.as_str());
        }
        req
    }

    fn write(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.request(method, path);
        if let Some(token) = &self.csrf_token {
            req = req.header(CSRF_HEADER, token.as_str());
        }
        req
    }

    async fn get_json<T>(&self, path: &str, page: Option<u32>) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let mut req = self.request(Method::GET, path);
        if let Some(page) = page {
            req = req.query(&[("page", page)]);
        }
        json_body(req.send().await?).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let res = self.write(method, path).json(body).send().await?;
        json_body(res).await
    }

    async fn send_delete(&self, path: &str) -> Result<(), FetchError> {
        let res = self.write(Method::DELETE, path).send().await?;
        success(res).await.map(|_| ())
    }
}

async fn success(res: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(FetchError::UnexpectedStatus { status, body })
}

async fn json_body<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, FetchError> {
    let body = success(res).await?.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

fn feed_path(scope: FeedScope) -> &'static str {
    match scope {
        FeedScope::Global => "/api/prayers",
        FeedScope::Personal => "/api/feed",
    }
}

fn reactions_path(target: &ReactionKey) -> String {
    let collection = match target.kind {
        EntityKind::Request => "prayers",
        EntityKind::Response => "responses",
    };
    format!("/api/{collection}/{}/reactions", target.target_id)
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_requests(&self, scope: FeedScope, page: u32) -> Result<Page<Request>, FetchError> {
        self.get_json(feed_path(scope), Some(page)).await
    }

    async fn fetch_responses(
        &self,
        request_id: &str,
        page: u32,
    ) -> Result<Page<Response>, FetchError> {
        let path = format!("/api/prayers/{request_id}/responses");
        self.get_json(&path, Some(page)).await
    }

    async fn fetch_reactions(&self, target: &ReactionKey) -> Result<Vec<Reaction>, FetchError> {
        let raw: Vec<Value> = self.get_json(&reactions_path(target), None).await?;
        raw.into_iter()
            .map(|value| Reaction::decode_for(target.kind, value).map_err(FetchError::from))
            .collect()
    }
}

#[async_trait]
impl FeedWriter for HttpPageSource {
    async fn create_request(&self, draft: &RequestDraft) -> Result<Request, FetchError> {
        self.send_json(Method::POST, "/api/prayers", draft).await
    }

    async fn update_request(&self, id: &str, draft: &RequestDraft) -> Result<Request, FetchError> {
        self.send_json(Method::PUT, &format!("/api/prayers/{id}"), draft)
            .await
    }

    async fn delete_request(&self, id: &str) -> Result<(), FetchError> {
        self.send_delete(&format!("/api/prayers/{id}")).await
    }

    async fn create_response(
        &self,
        request_id: &str,
        draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        let path = format!("/api/prayers/{request_id}/responses");
        self.send_json(Method::POST, &path, draft).await
    }

    async fn update_response(
        &self,
        id: &str,
        draft: &ResponseDraft,
    ) -> Result<Response, FetchError> {
        self.send_json(Method::PUT, &format!("/api/responses/{id}"), draft)
            .await
    }

    async fn delete_response(&self, id: &str) -> Result<(), FetchError> {
        self.send_delete(&format!("/api/responses/{id}")).await
    }

    async fn create_reaction(
        &self,
        target: &ReactionKey,
        draft: &ReactionDraft,
    ) -> Result<Reaction, FetchError> {
        let raw: Value = self
            .send_json(Method::POST, &reactions_path(target), draft)
            .await?;
        Ok(Reaction::decode_for(target.kind, raw)?)
    }

    async fn delete_reaction(&self, target: &ReactionKey, id: &str) -> Result<(), FetchError> {
        let path = format!("{}/{id}", reactions_path(target));
        self.send_delete(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_rest_layout() {
        assert_eq!(feed_path(FeedScope::Global), "/api/prayers");
        assert_eq!(feed_path(FeedScope::Personal), "/api/feed");
        assert_eq!(
            reactions_path(&ReactionKey::request("r1")),
            "/api/prayers/r1/reactions"
        );
        assert_eq!(
            reactions_path(&ReactionKey::response("s1")),
            "/api/responses/s1/reactions"
        );
    }

    #[test]
    fn writes_carry_csrf_token_and_session() {
        let source = HttpPageSource::new("http://localhost:9000")
            .with_csrf_token("tok")
            .with_session_cookie("PLAY_SESSION=abc");

        let write = source
            .write(Method::DELETE, "/api/prayers/r1")
            .build()
            .expect("build request");
        assert_eq!(write.url().as_str(), "http://localhost:9000/api/prayers/r1");
        assert_eq!(write.headers()[CSRF_HEADER], "tok");
        assert_eq!(write.headers()[COOKIE], "PLAY_SESSION=abc");

        let read = source
            .request(Method::GET, "/api/feed")
            .build()
            .expect("build request");
        assert!(read.headers().get(CSRF_HEADER).is_none());
        assert_eq!(read.headers()[COOKIE], "PLAY_SESSION=abc");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let source = HttpPageSource::new("http://localhost:9000/");
        assert_eq!(source.base_url(), "http://localhost:9000");
    }
}
