//! Scribe Core - Streaming Message Reassembly for the scribe writing assistant
//!
//! The agent server streams each assistant turn as a sequence of small JSON
//! frames over one connection per conversation. This crate turns that stream
//! into a readable, incrementally growing text with bounded latency and
//! bounded update frequency, and keeps the connection alive across drops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Callers (CLI, UI, tests)                     │
//! │   activate / deactivate        subscribe / current_text          │
//! └───────────────┬──────────────────────────────▲───────────────────┘
//!                 │ commands                     │ callbacks, watch
//! ┌───────────────┼──────────────────────────────┼───────────────────┐
//! │               ▼          StreamClient        │                   │
//! │  ┌────────────────────────┐      ┌───────────┴────────────────┐  │
//! │  │       Transport        │      │      StreamAssembler       │  │
//! │  │  one connection per    │─────►│  buffer ─flush─► visible   │  │
//! │  │  conversation,         │event │  (boundary, size, 30 ms    │  │
//! │  │  reconnect policy      │      │   debounce, done)          │  │
//! │  └───────────┬────────────┘      └────────────────────────────┘  │
//! └──────────────┼───────────────────────────────────────────────────┘
//!                │ Connector
//!      ┌─────────┴──────────┐
//!      │ WebSocket │ InProc │
//!      └────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamClient`]: handle to a running client (transport + assembler)
//! - [`InboundEvent`]: typed frame received from the server
//! - [`StreamAssembler`]: pure flush state machine
//! - [`Transport`]: connection lifecycle and reconnects
//! - [`ClientConfig`]: layered configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use scribe_core::{ClientConfig, StreamClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (client, _driver) = StreamClient::spawn_websocket(ClientConfig::default());
//!
//!     let _text = client.subscribe_text(|text| println!("{text}"));
//!     client.activate("session-42".parse()?);
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`client`]: the [`StreamClient`] façade and its driver task
//! - [`config`]: TOML/env/CLI configuration layering
//! - [`conversation`]: conversation identifiers
//! - [`events`]: inbound frame decoding
//! - [`streaming`]: the stream assembler
//! - [`subscribers`]: observer registries
//! - [`transport`]: connectors and the connection manager

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod conversation;
pub mod events;
pub mod streaming;
pub mod subscribers;
pub mod transport;

// Client exports
pub use client::{CompletedTurn, StreamClient};

// Config exports
pub use config::{
    apply_env_config, default_config_path, load_config, load_config_from_path, ClientConfig,
    ConfigError, ConfigOverrides, ConfigSource,
};

// Conversation exports
pub use conversation::{ConversationId, InvalidConversationId};

// Event exports
pub use events::{FrameError, InboundEvent, TokenUsage};

// Streaming exports
pub use streaming::{
    AssemblerEffect, AssemblerStats, FlushPolicy, FlushTrigger, StreamAssembler, TurnPhase,
};

// Subscriber exports
pub use subscribers::{DispatchResult, SubscriberSet, Subscription, SubscriptionId};

// Transport exports
pub use transport::{
    Backoff, ConnectionState, Connector, InProcessConnector, InProcessServer, ReconnectPolicy,
    ServerConnection, Transport, TransportConfig, TransportError, TransportSignal,
};
#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;
