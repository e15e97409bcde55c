//! In-Process Transport
//!
//! Channel-based connector for embedding the agent server in the same
//! process, and for driving the client from tests.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut server) = InProcessConnector::pair();
//! let (client, _driver) = StreamClient::spawn(config, Arc::new(connector));
//!
//! client.activate("abc".parse()?);
//! let conn = server.accept().await.unwrap();
//! conn.send_event(&InboundEvent::TextStart);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::events::InboundEvent;

use super::traits::{Connection, Connector, TransportError};

type FrameResult = Result<String, TransportError>;

#[derive(Debug)]
struct Shared {
    accepting: AtomicBool,
    attempts: AtomicUsize,
    incoming: mpsc::UnboundedSender<ServerConnection>,
}

/// Client side: hands out connections backed by tokio channels
#[derive(Clone, Debug)]
pub struct InProcessConnector {
    shared: Arc<Shared>,
}

impl InProcessConnector {
    /// Create a connector and the server that accepts its connections
    #[must_use]
    pub fn pair() -> (Self, InProcessServer) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            incoming: incoming_tx,
        });

        let server = InProcessServer {
            shared: Arc::clone(&shared),
            incoming: incoming_rx,
        };
        (Self { shared }, server)
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "{url}: connection refused"
            )));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let server_side = ServerConnection {
            url: url.to_string(),
            frames: frame_tx,
        };
        self.shared
            .incoming
            .send(server_side)
            .map_err(|_| TransportError::ConnectionFailed(format!("{url}: server gone")))?;

        Ok(Box::new(InProcessConnection {
            frames: UnboundedReceiverStream::new(frame_rx),
        }))
    }
}

/// Client half of one in-process connection
#[derive(Debug)]
pub struct InProcessConnection {
    frames: UnboundedReceiverStream<FrameResult>,
}

#[async_trait]
impl Connection for InProcessConnection {
    async fn recv(&mut self) -> Option<FrameResult> {
        self.frames.next().await
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

/// Server side: accepts connections from an [`InProcessConnector`]
#[derive(Debug)]
pub struct InProcessServer {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
}

impl InProcessServer {
    /// Wait for the next connection
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.recv().await
    }

    /// Take an already-established connection without waiting
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.incoming.try_recv().ok()
    }

    /// Accept or refuse new connection attempts
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Connection attempts made so far, including refused ones
    #[must_use]
    pub fn connection_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server half of one in-process connection
///
/// Dropping it (or calling [`ServerConnection::close`]) closes the
/// connection from the server side.
#[derive(Debug)]
pub struct ServerConnection {
    url: String,
    frames: mpsc::UnboundedSender<FrameResult>,
}

impl ServerConnection {
    /// URL the client dialled
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last path segment of the URL
    #[must_use]
    pub fn conversation(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or_default()
    }

    /// Encode and send an event; returns `false` if the client is gone
    pub fn send_event(&self, event: &InboundEvent) -> bool {
        self.send_raw(event.to_frame())
    }

    /// Send a text frame verbatim; returns `false` if the client is gone
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.frames.send(Ok(frame.into())).is_ok()
    }

    /// Break the connection with a receive error
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.frames.send(Err(TransportError::ReceiveFailed(reason.into())));
    }

    /// Close the connection from the server side
    pub fn close(self) {}

    /// Whether the client closed or dropped its half
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// Wait until the client closes or drops its half
    pub async fn closed(&self) {
        self.frames.closed().await;
    }
}
