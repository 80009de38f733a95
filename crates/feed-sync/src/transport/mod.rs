use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

/// Lifecycle of the single push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// One open push connection, seen as a pair of text-frame channels.
///
/// The inbound channel closes when the underlying connection is lost.
/// Dropping the outbound sender asks the connection to close; `task`, when
/// present, is the I/O task that finishes once it has.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub task: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            task: None,
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }
}

/// Opens push connections. Only the subscription manager calls this.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;
}
