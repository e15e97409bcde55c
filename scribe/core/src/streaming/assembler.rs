//! Stream Assembler
//!
//! Turns the `text_chunk` delta stream of one conversation into a throttled
//! "visible text" value. Deltas collect in a buffer and are moved to the
//! visible text (a *flush*) when:
//!
//! - the buffer ends in a sentence boundary character, or
//! - the buffer holds `max_buffer_chars` characters or more, or
//! - no new delta arrived for `delay_ms` (trailing debounce), or
//! - the turn ends (`done`) or a new one starts (`text_start`).
//!
//! The assembler does not own a clock or a timer. Callers pass `now` with
//! every event and are responsible for calling
//! [`StreamAssembler::fire_deadline`] once [`StreamAssembler::flush_deadline`]
//! has passed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::events::InboundEvent;

/// Characters that end a sentence or clause in the languages the agent writes
pub const DEFAULT_BOUNDARIES: &str = ".!?。！？，,；;：:、\n";

// ============================================================================
// Configuration
// ============================================================================

/// When buffered deltas are made visible
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushPolicy {
    /// Debounce delay after the last delta, in milliseconds
    pub delay_ms: u64,
    /// Buffer size (in characters) that forces a flush
    pub max_buffer_chars: usize,
    /// Trailing characters that force a flush
    pub boundaries: String,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 30,
            max_buffer_chars: 80,
            boundaries: DEFAULT_BOUNDARIES.to_string(),
        }
    }
}

impl FlushPolicy {
    /// The debounce delay
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether `ch` is a sentence boundary
    #[must_use]
    pub fn is_boundary(&self, ch: char) -> bool {
        self.boundaries.contains(ch)
    }
}

// ============================================================================
// State and Effects
// ============================================================================

/// Where the assembler is within a turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TurnPhase {
    /// No turn in progress
    #[default]
    Idle,
    /// Between `text_start` and `done`
    Accumulating,
}

/// What caused a flush
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Buffer ended in a boundary character
    Boundary,
    /// Buffer reached the size threshold
    Size,
    /// Debounce deadline passed
    Timer,
    /// Turn start or completion
    Forced,
}

/// Observable result of feeding the assembler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssemblerEffect {
    /// The visible text grew
    Published {
        /// The full visible text after the flush
        text: String,
        /// Why the flush happened
        trigger: FlushTrigger,
    },
    /// The visible text was reset to empty
    Cleared,
    /// A turn finished; its text is final
    TurnCompleted {
        /// The complete text of the turn
        text: String,
        /// Reason given by the server
        reason: String,
    },
}

/// Lifetime counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// `text_chunk` events observed
    pub chunks: u64,
    /// Flushes caused by a boundary character
    pub boundary_flushes: u64,
    /// Flushes caused by the size threshold
    pub size_flushes: u64,
    /// Flushes caused by the debounce deadline
    pub timer_flushes: u64,
    /// Flushes at turn start/end
    pub forced_flushes: u64,
    /// Turns that reached `done`
    pub turns_completed: u64,
    /// Turns thrown away (connection loss, switch, new turn without `done`)
    pub turns_discarded: u64,
    /// Time from start to `done` summed over completed turns, by the caller's clock
    pub turn_time: Duration,
}

impl AssemblerStats {
    /// Total flushes regardless of trigger
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.boundary_flushes + self.size_flushes + self.timer_flushes + self.forced_flushes
    }

    fn record(&mut self, trigger: FlushTrigger) {
        match trigger {
            FlushTrigger::Boundary => self.boundary_flushes += 1,
            FlushTrigger::Size => self.size_flushes += 1,
            FlushTrigger::Timer => self.timer_flushes += 1,
            FlushTrigger::Forced => self.forced_flushes += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct TurnCounters {
    chunks: u64,
    flushes: u64,
    started_at: Option<Instant>,
}

// ============================================================================
// Stream Assembler
// ============================================================================

/// Buffering state machine for one conversation's assistant turns
#[derive(Debug)]
pub struct StreamAssembler {
    policy: FlushPolicy,
    phase: TurnPhase,
    /// Deltas not yet visible
    buffer: String,
    /// `buffer.chars().count()`, kept incrementally
    buffer_chars: usize,
    /// Text already flushed in this turn
    visible: String,
    /// Armed debounce deadline
    flush_deadline: Option<Instant>,
    stats: AssemblerStats,
    turn: TurnCounters,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new(FlushPolicy::default())
    }
}

impl StreamAssembler {
    /// Create an idle assembler
    #[must_use]
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            phase: TurnPhase::Idle,
            buffer: String::new(),
            buffer_chars: 0,
            visible: String::new(),
            flush_deadline: None,
            stats: AssemblerStats::default(),
            turn: TurnCounters::default(),
        }
    }

    /// The flush policy in use
    #[must_use]
    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Current turn phase
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// The published visible text
    #[must_use]
    pub fn current_text(&self) -> &str {
        &self.visible
    }

    /// Deltas received but not yet visible
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// When the debounce flush is due, if armed
    #[must_use]
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_deadline
    }

    /// Lifetime statistics
    #[must_use]
    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    /// Feed one inbound event
    ///
    /// Only `text_start`, `text_chunk` and `done` change state; every other
    /// event returns no effects.
    pub fn observe(&mut self, event: &InboundEvent, now: Instant) -> Vec<AssemblerEffect> {
        let mut effects = Vec::new();
        match event {
            InboundEvent::TextStart => self.begin_turn(now, &mut effects),
            InboundEvent::TextChunk { delta } => {
                if let Some(effect) = self.push_delta(delta, now) {
                    effects.push(effect);
                }
            }
            InboundEvent::Done { reason } => self.complete_turn(reason, now, &mut effects),
            _ => {}
        }
        effects
    }

    /// Run the debounce flush if its deadline has passed
    ///
    /// Returns `None` when no deadline is armed, it is not yet due, or the
    /// buffer was already flushed.
    pub fn fire_deadline(&mut self, now: Instant) -> Option<AssemblerEffect> {
        match self.flush_deadline {
            Some(deadline) if deadline <= now => self.flush(FlushTrigger::Timer),
            _ => None,
        }
    }

    /// Throw away the in-flight turn and the visible text
    ///
    /// Used on connection loss, deactivation and conversation switch. Nothing
    /// pending is published; the deadline is cancelled.
    pub fn discard(&mut self) -> Option<AssemblerEffect> {
        if self.phase == TurnPhase::Accumulating {
            self.stats.turns_discarded += 1;
            tracing::debug!(
                pending_chars = self.buffer_chars,
                visible_chars = self.visible.chars().count(),
                "Discarding unfinished turn"
            );
        }
        self.phase = TurnPhase::Idle;
        self.flush_deadline = None;
        self.clear_buffer();
        self.clear_visible()
    }

    fn begin_turn(&mut self, now: Instant, effects: &mut Vec<AssemblerEffect>) {
        if self.phase == TurnPhase::Accumulating {
            // Previous turn never saw `done`; make its tail visible before resetting
            if let Some(effect) = self.flush(FlushTrigger::Forced) {
                effects.push(effect);
            }
            self.stats.turns_discarded += 1;
        }
        self.flush_deadline = None;
        self.clear_buffer();
        effects.extend(self.clear_visible());
        self.phase = TurnPhase::Accumulating;
        self.turn = TurnCounters {
            started_at: Some(now),
            ..TurnCounters::default()
        };
    }

    fn push_delta(&mut self, delta: &str, now: Instant) -> Option<AssemblerEffect> {
        if self.phase == TurnPhase::Idle {
            tracing::debug!("text_chunk outside a turn, starting one implicitly");
            self.phase = TurnPhase::Accumulating;
            self.turn = TurnCounters {
                started_at: Some(now),
                ..TurnCounters::default()
            };
        }

        self.stats.chunks += 1;
        self.turn.chunks += 1;
        self.buffer.push_str(delta);
        self.buffer_chars += delta.chars().count();

        let ends_on_boundary = self
            .buffer
            .chars()
            .next_back()
            .is_some_and(|c| self.policy.is_boundary(c));

        if ends_on_boundary {
            self.flush(FlushTrigger::Boundary)
        } else if self.buffer_chars >= self.policy.max_buffer_chars {
            self.flush(FlushTrigger::Size)
        } else {
            self.flush_deadline = Some(now + self.policy.delay());
            None
        }
    }

    fn complete_turn(
        &mut self,
        reason: &str,
        now: Instant,
        effects: &mut Vec<AssemblerEffect>,
    ) {
        if let Some(effect) = self.flush(FlushTrigger::Forced) {
            effects.push(effect);
        }
        if self.phase == TurnPhase::Accumulating {
            self.stats.turns_completed += 1;
            let elapsed = self
                .turn
                .started_at
                .map(|started| now.saturating_duration_since(started))
                .unwrap_or_default();
            self.stats.turn_time += elapsed;
            let elapsed_ms = elapsed.as_millis();
            tracing::debug!(
                chunks = self.turn.chunks,
                flushes = self.turn.flushes,
                chars = self.visible.chars().count(),
                elapsed_ms,
                reason,
                "Turn completed"
            );
            effects.push(AssemblerEffect::TurnCompleted {
                text: self.visible.clone(),
                reason: reason.to_string(),
            });
        }
        self.phase = TurnPhase::Idle;
    }

    fn flush(&mut self, trigger: FlushTrigger) -> Option<AssemblerEffect> {
        self.flush_deadline = None;
        if self.buffer.is_empty() {
            return None;
        }

        tracing::trace!(?trigger, chars = self.buffer_chars, "Flushing buffer");
        self.visible.push_str(&self.buffer);
        self.clear_buffer();
        self.stats.record(trigger);
        self.turn.flushes += 1;

        Some(AssemblerEffect::Published {
            text: self.visible.clone(),
            trigger,
        })
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.buffer_chars = 0;
    }

    fn clear_visible(&mut self) -> Option<AssemblerEffect> {
        if self.visible.is_empty() {
            return None;
        }
        self.visible.clear();
        Some(AssemblerEffect::Cleared)
    }
}
