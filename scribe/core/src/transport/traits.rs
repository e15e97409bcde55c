//! Transport Traits
//!
//! Two traits split "how to open a connection" from "an open connection":
//! - `Connector`: dials a URL (one per client, shared across reconnects)
//! - `Connection`: one established stream of text frames
//!
//! The client only ever reads from a connection; nothing is sent upstream.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URL could not be used to open a connection
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Connection to the server failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connecting did not finish in time
    #[error("connection attempt timed out after {0} ms")]
    Timeout(u64),

    /// Reading from an open connection failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The connection was closed
    #[error("connection closed")]
    Closed,

    /// IO error from the underlying socket
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens connections to the agent server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open, receive-only stream of text frames
#[async_trait]
pub trait Connection: Send {
    /// Receive the next text frame
    ///
    /// Returns `None` once the peer closed the connection. Must be cancel
    /// safe: dropping the future must not lose a frame.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection
    ///
    /// After this returns no further frames are delivered.
    async fn close(&mut self);
}
