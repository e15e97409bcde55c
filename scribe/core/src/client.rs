//! Stream Client
//!
//! Public façade over one [`Transport`] and one [`StreamAssembler`]. Both
//! live on a single driver task, so every inbound event, timer expiry and
//! caller command is processed to completion before the next one:
//!
//! ```text
//!   StreamClient (any thread)          driver task
//!   ─────────────────────────          ───────────────────────────────────
//!   activate / deactivate ──cmd──►     select! { biased;
//!                                        command,
//!                                        assembler flush deadline,
//!                                        transport.next_signal(),
//!                                      }
//!                                        │
//!   subscribe_raw  ◄──────────────────── ├─ raw event
//!   subscribe_text / text_updates ◄──── ├─ assembler effects
//!   subscribe_turns ◄────────────────── ├─ completed turn
//!   subscribe ◄──────────────────────── └─ processed event
//! ```
//!
//! Operations on the handle never block and never fail. Reads come from
//! `watch` channels kept current by the driver.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::conversation::ConversationId;
use crate::events::InboundEvent;
use crate::streaming::{AssemblerEffect, StreamAssembler};
use crate::subscribers::{SubscriberSet, Subscription};
use crate::transport::{
    sleep_until_opt, ConnectionState, Connector, Transport, TransportSignal,
};

/// A finished assistant turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedTurn {
    /// Conversation the turn belongs to
    pub conversation: ConversationId,
    /// Full text of the turn
    pub text: String,
    /// Completion reason reported by the server
    pub reason: String,
}

#[derive(Debug)]
enum Command {
    Activate(ConversationId),
    Deactivate,
    Shutdown,
}

#[derive(Default)]
struct Subscribers {
    raw: SubscriberSet<InboundEvent>,
    events: SubscriberSet<InboundEvent>,
    text: SubscriberSet<String>,
    turns: SubscriberSet<CompletedTurn>,
}

/// Handle to a running stream client
///
/// Cheap to clone; all clones control the same driver. The driver stops
/// after [`StreamClient::shutdown`] or once every handle is dropped.
#[derive(Clone)]
pub struct StreamClient {
    commands: mpsc::UnboundedSender<Command>,
    subscribers: Arc<Subscribers>,
    text_rx: watch::Receiver<String>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &*self.state_rx.borrow())
            .field("text_len", &self.text_rx.borrow().len())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Start a client driver on the current tokio runtime
    ///
    /// Nothing is connected until [`StreamClient::activate`] is called.
    #[must_use]
    pub fn spawn(config: ClientConfig, connector: Arc<dyn Connector>) -> (Self, JoinHandle<()>) {
        let ClientConfig {
            transport, flush, ..
        } = config;
        let transport = Transport::new(transport, connector);
        let state_rx = transport.state_updates();
        let (text_tx, text_rx) = watch::channel(String::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let subscribers = Arc::new(Subscribers::default());

        let driver = Driver {
            transport,
            assembler: StreamAssembler::new(flush),
            commands: command_rx,
            subscribers: Arc::clone(&subscribers),
            text_tx,
        };
        let handle = tokio::spawn(driver.run());

        let client = Self {
            commands: command_tx,
            subscribers,
            text_rx,
            state_rx,
        };
        (client, handle)
    }

    /// Start a client that dials the configured WebSocket endpoint
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn spawn_websocket(config: ClientConfig) -> (Self, JoinHandle<()>) {
        Self::spawn(
            config,
            Arc::new(crate::transport::WebSocketConnector::new()),
        )
    }

    /// Connect to `id`, closing the connection of any other conversation
    ///
    /// No-op when `id` is already connected or connecting.
    pub fn activate(&self, id: ConversationId) {
        self.send(Command::Activate(id));
    }

    /// Close the connection and stop reconnecting
    pub fn deactivate(&self) {
        self.send(Command::Deactivate);
    }

    /// Close the connection and stop the driver
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Receive every event after the assembler processed it
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribers.events.subscribe(callback)
    }

    /// Receive every event before the assembler sees it
    pub fn subscribe_raw<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribers.raw.subscribe(callback)
    }

    /// Receive the visible text every time it changes
    pub fn subscribe_text<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribers.text.subscribe(move |text: &String| callback(text))
    }

    /// Receive each turn once it completes
    pub fn subscribe_turns<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CompletedTurn) + Send + Sync + 'static,
    {
        self.subscribers.turns.subscribe(callback)
    }

    /// The visible text of the current (or last completed) turn
    #[must_use]
    pub fn current_text(&self) -> String {
        self.text_rx.borrow().clone()
    }

    /// Watch the visible text
    #[must_use]
    pub fn text_updates(&self) -> watch::Receiver<String> {
        self.text_rx.clone()
    }

    /// Watch the connection state
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Whether the active conversation's connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    fn send(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            tracing::warn!(?command, "Stream client is shut down, ignoring command");
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

struct Driver {
    transport: Transport,
    assembler: StreamAssembler,
    commands: mpsc::UnboundedReceiver<Command>,
    subscribers: Arc<Subscribers>,
    text_tx: watch::Sender<String>,
}

impl Driver {
    async fn run(mut self) {
        tracing::debug!("Stream client driver started");
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Activate(id)) => self.activate(id),
                    Some(Command::Deactivate) => self.deactivate(),
                    Some(Command::Shutdown) | None => break,
                },
                () = sleep_until_opt(self.assembler.flush_deadline()) => {
                    self.fire_deadline();
                }
                signal = self.transport.next_signal() => self.on_signal(signal),
            }
        }

        self.deactivate();
        self.commands.close();
        let stats = self.assembler.stats();
        tracing::debug!(
            chunks = stats.chunks,
            flushes = stats.flushes(),
            turns_completed = stats.turns_completed,
            turns_discarded = stats.turns_discarded,
            "Stream client driver stopped"
        );
    }

    fn activate(&mut self, id: ConversationId) {
        if self.transport.activate(id) {
            self.discard();
        }
    }

    fn deactivate(&mut self) {
        self.transport.deactivate();
        self.discard();
    }

    fn on_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Opened => {}
            TransportSignal::Frame(event) => self.on_event(&event),
            TransportSignal::Lost { .. } => self.discard(),
        }
    }

    fn on_event(&mut self, event: &InboundEvent) {
        // The debounce may have expired while this frame was queued
        self.fire_deadline();
        self.subscribers.raw.dispatch(event);

        for effect in self.assembler.observe(event, Instant::now()) {
            self.apply(effect);
        }

        if let InboundEvent::Error { data } = event {
            tracing::warn!(error = %data, "Server reported an error");
        }
        self.subscribers.events.dispatch(event);
    }

    fn fire_deadline(&mut self) {
        if let Some(effect) = self.assembler.fire_deadline(Instant::now()) {
            self.apply(effect);
        }
    }

    fn discard(&mut self) {
        if let Some(effect) = self.assembler.discard() {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: AssemblerEffect) {
        match effect {
            AssemblerEffect::Published { text, .. } => self.publish_text(text),
            AssemblerEffect::Cleared => self.publish_text(String::new()),
            AssemblerEffect::TurnCompleted { text, reason } => {
                let Some(conversation) = self.transport.active().cloned() else {
                    return;
                };
                self.subscribers.turns.dispatch(&CompletedTurn {
                    conversation,
                    text,
                    reason,
                });
            }
        }
    }

    fn publish_text(&mut self, text: String) {
        self.text_tx.send_replace(text.clone());
        self.subscribers.text.dispatch(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessConnector;

    #[tokio::test]
    async fn test_commands_after_shutdown_are_ignored() {
        let (connector, _server) = InProcessConnector::pair();
        let (client, driver) = StreamClient::spawn(ClientConfig::default(), Arc::new(connector));

        client.shutdown();
        driver.await.unwrap();

        // must neither panic nor connect
        client.activate(ConversationId::new("abc").unwrap());
        client.deactivate();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_driver_stops_when_handles_dropped() {
        let (connector, _server) = InProcessConnector::pair();
        let (client, driver) = StreamClient::spawn(ClientConfig::default(), Arc::new(connector));
        let other = client.clone();

        drop(client);
        drop(other);
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (connector, _server) = InProcessConnector::pair();
        let (client, _driver) = StreamClient::spawn(ClientConfig::default(), Arc::new(connector));

        assert_eq!(client.current_text(), "");
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(format!("{client:?}").contains("StreamClient"));
    }
}
