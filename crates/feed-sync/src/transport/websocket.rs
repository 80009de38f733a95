use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Connector, Link};
use crate::error::TransportError;

/// [`Connector`] for the feed's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self {
            url: normalize_ws_url(url.as_ref()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Adds a scheme when missing, maps `http(s)` to `ws(s)` and pins
/// `localhost` to IPv4.
pub fn normalize_ws_url(raw: &str) -> String {
    let raw = raw.trim();
    let mut url = if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else if raw.contains("localhost") || raw.contains("127.0.0.1") {
        format!("ws://{raw}")
    } else {
        format!("wss://{raw}")
    };

    if url.contains("localhost") {
        url = url.replace("localhost", "127.0.0.1");
    }
    url
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    url: self.url.clone(),
                    reason: err.to_string(),
                })?;
        info!(url = %self.url, "push connection open");

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();
        let url = self.url.clone();
        let task = tokio::spawn(async move {
            pump(ws_stream, rx_out, tx_in).await;
            debug!(%url, "push connection task finished");
        });

        Ok(Link::new(tx_out, rx_in).with_task(task))
    }
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = rx_out.recv() => match outbound {
                Some(text) => {
                    if let Err(err) = ws_sender.send(Message::Text(text.into())).await {
                        warn!(error = %err, "push connection send failed");
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if tx_in.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if tx_in.send(text).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "push connection closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "push connection error");
                    break;
                }
                None => break,
            },
        }
    }
}
