//! Shared status display
//!
//! A small board tracking what the assistant is currently doing, shared
//! between the worker and the producers. Purely informational; routing never
//! depends on it.

use std::sync::Mutex;

/// Assistant phase shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the wake word
    Listening,
    /// Capturing a spoken command
    Recording,
    /// Transcribing or waiting on the agent
    Processing,
    /// Playing the spoken response
    Speaking,
    /// A per-turn error is being reported
    Error,
}

impl Phase {
    /// Lowercase name for log fields
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    transcription: String,
    response: String,
}

/// Current phase plus the last transcription and response
#[derive(Debug)]
pub struct StatusBoard {
    inner: Mutex<Inner>,
}

impl StatusBoard {
    /// Create a board in the listening phase
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Listening,
                transcription: String::new(),
                response: String::new(),
            }),
        }
    }

    /// Update the current phase
    pub fn set_phase(&self, phase: Phase) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.phase != phase {
                tracing::info!(phase = phase.name(), "phase changed");
                inner.phase = phase;
            }
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().map_or(Phase::Listening, |i| i.phase)
    }

    /// Record the last transcription
    pub fn set_transcription(&self, text: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.transcription = text.to_string();
        }
    }

    /// Record the last response
    pub fn set_response(&self, text: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.response = text.to_string();
        }
    }

    /// Last transcription
    #[must_use]
    pub fn transcription(&self) -> String {
        self.inner
            .lock()
            .map(|i| i.transcription.clone())
            .unwrap_or_default()
    }

    /// Last response
    #[must_use]
    pub fn response(&self) -> String {
        self.inner
            .lock()
            .map(|i| i.response.clone())
            .unwrap_or_default()
    }

    /// Print a response to the terminal transcript (keyboard channel)
    pub fn print_response(&self, text: &str) {
        self.set_response(text);
        println!("\n{text}\n");
    }

    /// Print a short notice to the terminal transcript
    pub fn print_notice(&self, text: &str) {
        println!("{text}");
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
