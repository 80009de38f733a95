//! In-process [`Connector`] for tests and offline tooling.

use std::sync::Arc;

use async_trait::async_trait;
use feed_protocol::ControlFrame;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Link};
use crate::error::TransportError;

/// Hands out in-memory links, records what the client sends, and lets the
/// caller inject inbound frames or cut the current link.
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    connects: usize,
    fail_next: usize,
    sent: Vec<String>,
    outbound: Vec<mpsc::UnboundedReceiver<String>>,
    inbound: Option<mpsc::UnboundedSender<String>>,
}

impl MockState {
    fn drain(&mut self) {
        for rx in &mut self.outbound {
            while let Ok(text) = rx.try_recv() {
                self.sent.push(text);
            }
        }
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` connection attempts fail.
    pub fn fail_next(&self, times: usize) {
        self.inner.lock().fail_next = times;
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    /// Every raw text frame sent so far, across all links.
    pub fn sent(&self) -> Vec<String> {
        let mut state = self.inner.lock();
        state.drain();
        state.sent.clone()
    }

    /// Sent frames decoded as control frames; anything else is skipped.
    pub fn frames(&self) -> Vec<ControlFrame> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn clear_sent(&self) {
        let mut state = self.inner.lock();
        state.drain();
        state.sent.clear();
    }

    /// Delivers `text` on the current link. Returns false when no link is open.
    pub fn push(&self, text: impl Into<String>) -> bool {
        let state = self.inner.lock();
        state
            .inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Simulates the server going away: the current link's inbound stream ends.
    pub fn drop_link(&self) {
        let mut state = self.inner.lock();
        state.drain();
        state.inbound = None;
        state.outbound.clear();
    }

    pub fn is_linked(&self) -> bool {
        self.inner
            .lock()
            .inbound
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let mut state = self.inner.lock();
        state.connects += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Connect {
                url: "mock://".into(),
                reason: "refused".into(),
            });
        }
        let (tx_out, rx_out) = mpsc::unbounded_channel();
        let (tx_in, rx_in) = mpsc::unbounded_channel();
        state.drain();
        state.outbound.push(rx_out);
        state.inbound = Some(tx_in);
        Ok(Link::new(tx_out, rx_in))
    }
}
