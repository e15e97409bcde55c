//! Connection Manager
//!
//! Owns the single connection of the active conversation and turns its
//! lifecycle into a stream of [`TransportSignal`]s:
//!
//! ```text
//!   activate(id) ──► Connecting ──ok──► Open ──frames──► Frame(event) ...
//!                        │                │
//!                        │ err/timeout    │ closed/error
//!                        ▼                ▼
//!                    Reconnecting { attempt, delay } ──delay──► Connecting
//!                        │
//!                        │ attempts exhausted
//!                        ▼
//!                      GaveUp
//! ```
//!
//! The manager is not a task of its own. The owner awaits
//! [`Transport::next_signal`] in its event loop; all state changes happen
//! synchronously inside that call or inside `activate`/`deactivate`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::conversation::ConversationId;
use crate::events::InboundEvent;

use super::config::TransportConfig;
use super::traits::{Connection, Connector, TransportError};

/// Connection lifecycle as seen by subscribers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No conversation is active
    #[default]
    Idle,
    /// Dialling; `attempt` is 0 for the first connect, then the reconnect number
    Connecting {
        /// Reconnect attempt number
        attempt: u32,
    },
    /// Connected and receiving frames
    Open,
    /// Waiting `delay` before reconnect attempt `attempt`
    Reconnecting {
        /// Upcoming attempt number (1-based)
        attempt: u32,
        /// Wait before the attempt
        delay: Duration,
    },
    /// Reconnect attempts exhausted; waiting for the next `activate`
    GaveUp {
        /// Attempts made since the last open connection
        attempts: u32,
    },
}

impl ConnectionState {
    /// Whether a connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting { attempt: 0 } => f.write_str("connecting"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting in {} ms (attempt {attempt})", delay.as_millis())
            }
            Self::GaveUp { attempts } => write!(f, "gave up after {attempts} attempts"),
        }
    }
}

/// What happened on the transport
#[derive(Debug)]
pub enum TransportSignal {
    /// The connection for the active conversation opened
    Opened,
    /// A well-formed frame arrived
    Frame(InboundEvent),
    /// The connection closed unexpectedly or could not be opened
    Lost {
        /// Human-readable cause
        reason: String,
    },
}

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Connection>, TransportError>>;

/// One-connection-per-conversation manager with automatic reconnect
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,

    /// Conversation the caller wants to be connected to
    active: Option<ConversationId>,
    /// Connect attempt in flight
    connecting: Option<ConnectFuture>,
    /// Established connection
    connection: Option<Box<dyn Connection>>,
    /// When the pending reconnect fires
    reconnect_at: Option<Instant>,
    /// Reconnect attempts since the last open connection
    attempt: u32,

    state_tx: watch::Sender<ConnectionState>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.config.endpoint)
            .field("active", &self.active)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create an idle transport
    #[must_use]
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            connector,
            active: None,
            connecting: None,
            connection: None,
            reconnect_at: None,
            attempt: 0,
            state_tx,
        }
    }

    /// Receiver for connection state changes
    #[must_use]
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Whether a connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The active conversation
    #[must_use]
    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// When the pending reconnect attempt fires, if one is scheduled
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Make `id` the active conversation
    ///
    /// Closes the connection of any other conversation first. Returns `false`
    /// when `id` is already open or connecting (nothing changed), `true` when
    /// a connect attempt was started.
    pub fn activate(&mut self, id: ConversationId) -> bool {
        if self.active.as_ref() == Some(&id) {
            if self.connection.is_some() || self.connecting.is_some() {
                tracing::debug!(conversation = %id, "Already active");
                return false;
            }
            // Waiting to reconnect (or gave up): try again right away
            tracing::info!(conversation = %id, "Reactivating, reconnecting now");
            self.reconnect_at = None;
            self.attempt = 0;
            self.start_connect();
            return true;
        }

        if let Some(previous) = &self.active {
            tracing::info!(from = %previous, to = %id, "Switching conversation");
        }
        self.teardown();
        self.active = Some(id);
        self.attempt = 0;
        self.start_connect();
        true
    }

    /// Close the connection and forget the active conversation
    ///
    /// Cancels any pending reconnect. Returns `false` if nothing was active.
    pub fn deactivate(&mut self) -> bool {
        let Some(id) = self.active.take() else {
            return false;
        };
        self.teardown();
        self.attempt = 0;
        self.set_state(ConnectionState::Idle);
        tracing::info!(conversation = %id, "Deactivated");
        true
    }

    /// Wait for the next transport signal
    ///
    /// Pending forever while nothing is active. Cancel safe: dropping the
    /// future loses neither a frame nor a connect attempt.
    pub async fn next_signal(&mut self) -> TransportSignal {
        loop {
            let step = tokio::select! {
                result = poll_connecting(&mut self.connecting) => Step::Connected(result),
                frame = next_frame(&mut self.connection) => Step::Frame(frame),
                () = sleep_until_opt(self.reconnect_at) => Step::ReconnectDue,
            };

            match step {
                Step::Connected(Ok(connection)) => {
                    self.connecting = None;
                    self.connection = Some(connection);
                    self.attempt = 0;
                    self.set_state(ConnectionState::Open);
                    if let Some(id) = &self.active {
                        tracing::info!(conversation = %id, "Connection open");
                    }
                    return TransportSignal::Opened;
                }
                Step::Connected(Err(e)) => {
                    self.connecting = None;
                    return self.on_lost(e.to_string());
                }
                Step::Frame(Some(Ok(text))) => match InboundEvent::parse(&text) {
                    Ok(event) => return TransportSignal::Frame(event),
                    Err(e) => {
                        tracing::warn!(
                            conversation = ?self.active.as_ref().map(ConversationId::as_str),
                            error = %e,
                            "Dropping malformed frame"
                        );
                    }
                },
                Step::Frame(Some(Err(e))) => {
                    self.connection = None;
                    return self.on_lost(e.to_string());
                }
                Step::Frame(None) => {
                    self.connection = None;
                    return self.on_lost(TransportError::Closed.to_string());
                }
                Step::ReconnectDue => {
                    self.reconnect_at = None;
                    if self.active.is_some() {
                        self.start_connect();
                    }
                }
            }
        }
    }

    fn start_connect(&mut self) {
        let Some(id) = &self.active else {
            return;
        };

        let url = id.url_under(&self.config.endpoint);
        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout();
        let timeout_ms = self.config.connect_timeout_ms;
        tracing::info!(conversation = %id, attempt = self.attempt, url = %url, "Connecting");

        self.connecting = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout_ms)),
            }
        }));
        self.set_state(ConnectionState::Connecting {
            attempt: self.attempt,
        });
    }

    fn on_lost(&mut self, reason: String) -> TransportSignal {
        let policy = &self.config.reconnect;
        let next = self.attempt.saturating_add(1);
        let conversation = self.active.as_ref().map(ConversationId::as_str);

        if policy.allows(next) {
            let delay = policy.delay_for(next);
            tracing::warn!(
                conversation = ?conversation,
                attempt = next,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason = %reason,
                "Connection lost, scheduling reconnect"
            );
            self.attempt = next;
            self.reconnect_at = Some(Instant::now() + delay);
            self.set_state(ConnectionState::Reconnecting {
                attempt: next,
                delay,
            });
        } else {
            tracing::warn!(
                conversation = ?conversation,
                attempts = self.attempt,
                reason = %reason,
                "Connection lost, giving up"
            );
            self.reconnect_at = None;
            self.set_state(ConnectionState::GaveUp {
                attempts: self.attempt,
            });
        }

        TransportSignal::Lost { reason }
    }

    /// Drop every in-flight resource; an open connection is closed in the background
    fn teardown(&mut self) {
        self.connecting = None;
        self.reconnect_at = None;
        if let Some(mut connection) = self.connection.take() {
            tokio::spawn(async move {
                connection.close().await;
            });
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

enum Step {
    Connected(Result<Box<dyn Connection>, TransportError>),
    Frame(Option<Result<String, TransportError>>),
    ReconnectDue,
}

async fn poll_connecting(
    slot: &mut Option<ConnectFuture>,
) -> Result<Box<dyn Connection>, TransportError> {
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    slot: &mut Option<Box<dyn Connection>>,
) -> Option<Result<String, TransportError>> {
    match slot {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
