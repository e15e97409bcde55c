//! WebSocket Transport
//!
//! Connector for a real agent server speaking JSON text frames over
//! WebSocket. Binary frames are accepted when they hold UTF-8 text;
//! ping/pong is answered by tungstenite itself.
//!
//! `wss://` endpoints need a TLS backend feature enabled on
//! `tokio-tungstenite`; without one the connect attempt fails and is
//! retried like any other failure.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::events::FrameError;

use super::traits::{Connection, Connector, TransportError};

/// Dials `ws://` and `wss://` URLs
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: "scheme must be ws or wss".to_string(),
            });
        }

        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{url}: {e}")))?;

        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open WebSocket
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!(error = %FrameError::NotUtf8, "Dropping binary frame");
                    }
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Server sent close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
