//! Scribe Watch
//!
//! Attaches to one conversation on a scribe agent server and prints the
//! assistant's text to stdout as it is assembled. Connection changes (and,
//! with `--show-events`, tool and status events) are logged to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Watch conversation "session-42" on the default endpoint
//! scribe-watch session-42
//!
//! # Custom endpoint, give up after 5 reconnect attempts
//! scribe-watch --endpoint wss://agent.example/ws --max-reconnect-attempts 5 session-42
//!
//! # With verbose logging
//! RUST_LOG=scribe_core=debug scribe-watch session-42
//! ```
//!
//! # Commands (stdin)
//!
//! - `/switch <id>`: watch another conversation
//! - `/leave`: disconnect but keep running
//! - `/quit`: exit
//!
//! # Signals
//!
//! - SIGINT: Graceful shutdown

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use scribe_core::{
    load_config, Backoff, CompletedTurn, ConfigOverrides, ConversationId, InboundEvent,
    StreamClient,
};

/// Print a scribe conversation's assistant text as it streams
#[derive(Debug, Parser)]
#[command(name = "scribe-watch", version)]
struct Args {
    /// Conversation to attach to
    conversation: ConversationId,

    /// Base WebSocket URL (the conversation id is appended)
    #[arg(long)]
    endpoint: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/scribe/client.toml)
    #[arg(long, env = "SCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Debounce delay before buffered text is shown, in ms
    #[arg(long)]
    flush_delay_ms: Option<u64>,

    /// Buffered characters that force the text to be shown
    #[arg(long)]
    max_buffer_chars: Option<usize>,

    /// Delay before reconnecting, in ms
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Give up after this many consecutive reconnect attempts
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Reconnect delay growth: fixed or exponential
    #[arg(long)]
    backoff: Option<Backoff>,

    /// Log tool, error and status events
    #[arg(long)]
    show_events: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            connect_timeout_ms: None,
            reconnect_delay_ms: self.reconnect_delay_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff: self.backoff,
            flush_delay_ms: self.flush_delay_ms,
            max_buffer_chars: self.max_buffer_chars,
        }
    }
}

/// What the callbacks hand to the main loop
enum Update {
    Text(String),
    Event(InboundEvent),
    Turn(CompletedTurn),
}

/// A line typed on stdin
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Switch(ConversationId),
    Leave,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("/switch"), Some(id)) => id
            .parse()
            .map(|id| Some(Command::Switch(id)))
            .map_err(|e| format!("{e}")),
        (Some("/switch"), None) => Err("usage: /switch <conversation>".to_string()),
        (Some("/leave"), None) => Ok(Some(Command::Leave)),
        (Some("/quit" | "/exit"), None) => Ok(Some(Command::Quit)),
        _ => Err(format!("unknown command {line:?} (try /switch <id>, /leave, /quit)")),
    }
}

/// Turns successive visible-text values into terminal output
#[derive(Debug, Default)]
struct TextPrinter {
    shown: String,
}

impl TextPrinter {
    /// Output for a new visible text, or `None` if nothing changes on screen
    fn on_text(&mut self, text: &str) -> Option<String> {
        if text.is_empty() {
            self.shown.clear();
            return None;
        }
        let output = match text.strip_prefix(self.shown.as_str()) {
            Some("") => None,
            Some(suffix) => Some(suffix.to_string()),
            // Not a continuation: start over on a fresh line
            None if self.shown.is_empty() => Some(text.to_string()),
            None => Some(format!("\n{text}")),
        };
        text.clone_into(&mut self.shown);
        output
    }
}

fn log_event(event: &InboundEvent) {
    match event {
        InboundEvent::ToolStart { name } => info!(tool = %name, "Tool started"),
        InboundEvent::ToolEnd { name, state } => {
            info!(tool = %name, state = state.as_deref().unwrap_or("done"), "Tool finished");
        }
        InboundEvent::ToolError { name, error } => warn!(tool = %name, error = %error, "Tool failed"),
        InboundEvent::Error { data } => warn!(error = %data, "Server error"),
        InboundEvent::TokenUsage { .. } => {
            if let Some(usage) = event.token_usage() {
                info!(
                    input = usage.input_tokens,
                    output = usage.output_tokens,
                    total = usage.total_tokens,
                    "Token usage"
                );
            }
        }
        InboundEvent::StateChanged { data } => info!(state = %data, "Agent state changed"),
        InboundEvent::Unknown { kind, .. } => info!(kind = %kind, "Unrecognised event"),
        InboundEvent::TextStart
        | InboundEvent::TextChunk { .. }
        | InboundEvent::TextEnd
        | InboundEvent::Done { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only the conversation text
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scribe_watch=info".parse()?)
                .add_directive("scribe_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = load_config(args.config.as_deref(), &args.overrides())?;
    info!(
        endpoint = %config.transport.endpoint,
        source = %config.source,
        "Configuration loaded"
    );

    let (client, driver) = StreamClient::spawn_websocket(config);

    let (update_tx, mut updates) = mpsc::unbounded_channel();
    let text_tx = update_tx.clone();
    let _text = client.subscribe_text(move |text| {
        let _ = text_tx.send(Update::Text(text.to_string()));
    });
    let turn_tx = update_tx.clone();
    let _turns = client.subscribe_turns(move |turn| {
        let _ = turn_tx.send(Update::Turn(turn.clone()));
    });
    let _events = args.show_events.then(|| {
        client.subscribe(move |event| {
            if !matches!(
                event,
                InboundEvent::TextStart
                    | InboundEvent::TextChunk { .. }
                    | InboundEvent::TextEnd
                    | InboundEvent::Done { .. }
            ) {
                let _ = update_tx.send(Update::Event(event.clone()));
            }
        })
    });

    let mut states = client.connection_state();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();
    let mut printer = TextPrinter::default();

    info!(conversation = %args.conversation, "Attaching");
    client.activate(args.conversation.clone());

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
            Some(update) = updates.recv() => match update {
                Update::Text(text) => {
                    if let Some(output) = printer.on_text(&text) {
                        stdout.write_all(output.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                }
                Update::Turn(turn) => {
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                    info!(conversation = %turn.conversation, reason = %turn.reason, "Turn complete");
                }
                Update::Event(event) => log_event(&event),
            },
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("Stream client stopped");
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!(state = %state, "Connection state");
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(Command::Switch(id))) => {
                        info!(conversation = %id, "Switching");
                        client.activate(id);
                    }
                    Ok(Some(Command::Leave)) => client.deactivate(),
                    Ok(Some(Command::Quit)) => break,
                    Ok(None) => {}
                    Err(message) => warn!("{message}"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    client.shutdown();
    driver.await?;
    stdout.flush().await?;
    Ok(())
}
