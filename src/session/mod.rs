//! Voice session state
//!
//! One session is in flight at a time. It cycles
//!
//! ```text
//! IdleListening -> CapturingUtterance -> ProcessingTurn -> Speaking
//!       ^                  |                   |              |
//!       +------------------+-------------------+--------------+
//! ```
//!
//! returning to `IdleListening` after every turn, failed or not.

mod orchestrator;

use std::fmt;
use std::time::Duration;

use crate::voice::GateConfig;

pub use orchestrator::{Components, Orchestrator};

/// Where the session is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for a registered name
    #[default]
    IdleListening,
    /// Recording the utterance that followed the name
    CapturingUtterance,
    /// Waiting on the dialogue backend
    ProcessingTurn,
    /// Playing the reply
    Speaking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IdleListening => "idle",
            Self::CapturingUtterance => "capturing",
            Self::ProcessingTurn => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// Transcript of the utterance being captured
///
/// Keeps committed text separately from the recognizer's latest
/// uncommitted hypothesis, which each new partial replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptAccumulator {
    committed: String,
    partial: Option<String>,
}

impl TranscriptAccumulator {
    /// Replace the uncommitted hypothesis
    pub fn set_partial(&mut self, partial: impl Into<String>) {
        let partial = partial.into();
        self.partial = (!partial.trim().is_empty()).then_some(partial);
    }

    /// Commit final text from the recognizer
    ///
    /// Non-empty text replaces the hypothesis. Empty text promotes the
    /// hypothesis as-is.
    pub fn commit(&mut self, text: &str) {
        let text = text.trim();
        let segment = if text.is_empty() {
            self.partial.take()
        } else {
            self.partial = None;
            Some(text.to_string())
        };

        if let Some(segment) = segment {
            let segment = segment.trim();
            if !self.committed.is_empty() && !segment.is_empty() {
                self.committed.push(' ');
            }
            self.committed.push_str(segment);
        }
    }

    /// Committed text followed by the current hypothesis
    #[must_use]
    pub fn text(&self) -> String {
        match &self.partial {
            Some(partial) if self.committed.is_empty() => partial.trim().to_string(),
            Some(partial) => format!("{} {}", self.committed, partial.trim()),
            None => self.committed.clone(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.partial.is_none()
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.partial = None;
    }
}

/// The single mutable session
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    /// Persona addressed by the name that opened the capture
    pub persona: Option<String>,
    pub transcript: TranscriptAccumulator,
    /// Number of turns submitted so far
    pub turn: u64,
}

/// Orchestrator timing and behavior
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Voice activity hysteresis
    pub gate: GateConfig,
    /// Abandon a capture when no speech starts within this time
    pub no_speech_timeout: Duration,
    /// Finalize a capture after this long regardless of silence
    pub max_utterance: Duration,
    /// Bound on each wait for the dialogue backend
    pub response_timeout: Duration,
    /// Synthesize the reply sentence by sentence as it arrives
    pub streaming_tts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            no_speech_timeout: Duration::from_secs(5),
            max_utterance: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
            streaming_tts: false,
        }
    }
}

/// What a frame did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Listening, nothing detected
    Idle,
    /// A registered name was heard, capture started
    WakeDetected,
    /// Frame added to the utterance
    Capturing,
    /// Utterance finalized with text, a turn is ready to run
    TurnReady,
    /// Capture ended without anything to send
    Discarded,
    /// A turn is in flight, frame ignored
    Dropped,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply synthesized and played
    Spoken,
    /// Backend replied with no text
    Empty,
    /// Turn failed, nothing more was played
    Aborted(String),
}

impl TurnOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Spoken => "spoken",
            Self::Empty => "empty",
            Self::Aborted(_) => "aborted",
        }
    }
}

/// Per-turn counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub turn: u64,
    pub persona: Option<String>,
    pub request_chars: usize,
    pub response_chars: usize,
    pub elapsed: Duration,
    /// Frames dropped while the turn was in flight
    pub dropped_frames: u64,
}

impl TurnStats {
    pub(crate) fn log(&self, outcome: &TurnOutcome) {
        tracing::info!(
            turn = self.turn,
            persona = self.persona.as_deref().unwrap_or("-"),
            request_chars = self.request_chars,
            response_chars = self.response_chars,
            elapsed_ms = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            dropped_frames = self.dropped_frames,
            outcome = outcome.label(),
            "turn complete"
        );
        if self.dropped_frames > 0 {
            tracing::debug!(dropped = self.dropped_frames, "frames dropped while turn was in flight");
        }
    }
}
