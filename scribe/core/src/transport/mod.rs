//! Transport Layer
//!
//! One connection per active conversation, with automatic reconnect.
//!
//! - `Connector`/`Connection`: the seam to the actual wire
//! - `InProcessConnector`: tokio channels (embedding, tests)
//! - `WebSocketConnector`: tokio-tungstenite (feature `websocket`)
//! - `Transport`: lifecycle, reconnect policy and frame decoding on top of a
//!   connector

pub mod config;
pub mod in_process;
mod manager;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::{Backoff, ReconnectPolicy, TransportConfig, DEFAULT_ENDPOINT};
pub use in_process::{InProcessConnector, InProcessServer, ServerConnection};
pub use manager::{ConnectionState, Transport, TransportSignal};
pub(crate) use manager::sleep_until_opt;
pub use traits::{Connection, Connector, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
