use std::env;
use std::str::FromStr;

use crate::telemetry::DEFAULT_FILTER;
use crate::transport::websocket::normalize_ws_url;

/// Where pushed `new-response` deltas land in a response list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponsePlacement {
    /// Always append at the tail.
    #[default]
    Append,
    /// Append only once the list is fully loaded; before that the response
    /// arrives with a later page.
    WhenLoaded,
}

impl FromStr for ResponsePlacement {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(ResponsePlacement::Append),
            "when-loaded" | "when_loaded" => Ok(ResponsePlacement::WhenLoaded),
            other => Err(format!("unknown response placement '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base: String,
    pub ws_url: String,
    /// Enables the personal feed and the viewer's `user.<id>` channel.
    pub viewer_id: Option<String>,
    /// `<scope>` of the `public.<scope>` channel.
    pub public_scope: String,
    pub response_placement: ResponsePlacement,
    pub event_capacity: usize,
    pub log_filter: String,
    /// Sent as the `Csrf-Token` header on every write.
    pub csrf_token: Option<String>,
    /// Raw `Cookie` header value carrying the signed-in session.
    pub session_cookie: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:9000".into(),
            ws_url: normalize_ws_url("ws://localhost:9000/ws"),
            viewer_id: None,
            public_scope: "local".into(),
            response_placement: ResponsePlacement::default(),
            event_capacity: 256,
            log_filter: DEFAULT_FILTER.into(),
            csrf_token: None,
            session_cookie: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: env::var("FEED_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            ws_url: env::var("FEED_WS_URL")
                .map(|value| normalize_ws_url(&value))
                .unwrap_or(defaults.ws_url),
            viewer_id: non_empty_var("FEED_VIEWER_ID"),
            public_scope: env::var("FEED_PUBLIC_SCOPE").unwrap_or(defaults.public_scope),
            response_placement: env::var("FEED_RESPONSE_PLACEMENT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.response_placement),
            event_capacity: env::var("FEED_EVENT_CAPACITY")
                .ok()
                .and_then(|value| value.parse().ok())
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.event_capacity),
            log_filter: env::var("RUST_LOG").unwrap_or(defaults.log_filter),
            csrf_token: non_empty_var("FEED_CSRF_TOKEN"),
            session_cookie: non_empty_var("FEED_SESSION_COOKIE"),
        }
    }

    pub fn with_viewer(mut self, viewer_id: impl Into<String>) -> Self {
        self.viewer_id = Some(viewer_id.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ws_url(mut self, ws_url: &str) -> Self {
        self.ws_url = normalize_ws_url(ws_url);
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
