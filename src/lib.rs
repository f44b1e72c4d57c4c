//! Jarvis Gateway - wake-word voice assistant with a Claude Code backend
//!
//! This library wires a wake-word detector, a VAD-gated recorder, the
//! Whisper/TTS APIs, a Matrix chat bridge and the Claude Code CLI into one
//! serialized event loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Producers                         │
//! │   Voice loop  │  Keyboard  │  Matrix bridge          │
//! └────────────────────┬────────────────────────────────┘
//!                      │ envelopes (FIFO)
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Worker                          │
//! │   transcribe → filter → keywords → agent → route     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Speech output  │  Terminal  │  Chat outbox         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod input;
pub mod keywords;
pub mod message;
pub mod ui;
pub mod voice;
pub mod worker;

pub use agent::{ClaudeBackend, ConversationalAgent, SessionState};
pub use channels::{ChatReply, MatrixBridge};
pub use config::Config;
pub use error::{Error, Result};
pub use keywords::{KeywordAction, KeywordSet};
pub use message::{AudioClip, ClipEncoding, Envelope, Payload, Source};
pub use ui::{Phase, StatusBoard};
pub use worker::{Collaborators, QueueHandle, TurnSignals, Worker};
