//! Parley Gateway - wake-word voice front end for persona-addressed dialogue
//!
//! This library provides the core functionality for the Parley gateway:
//! - Wake word spotting for several registered names
//! - Voice-activity gated utterance capture
//! - Dialogue turns routed to the persona behind each name
//! - Speech synthesis and playback of the reply
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Microphone                         │
//! │          fixed-length 16-bit PCM frames              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Session Orchestrator                   │
//! │  Wake Spotter │ Voice Gate │ Recognizer │ Synthesizer│
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Dialogue Backend                       │
//! │        persona switch  │  turn  │  reply stream      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod db;
pub mod dialogue;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, FactStore};
pub use dialogue::{DialogueClient, WebSocketDialogueClient};
pub use error::{Error, Result};
pub use pipeline::StreamingPipeline;
pub use session::{FrameOutcome, Orchestrator, SessionState, TurnOutcome};
