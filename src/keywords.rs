//! Command keyword interception
//!
//! Matches transcripts against the configured cancel/reset/restart phrase
//! lists before any AI call is made. Priority is fixed: cancel beats reset
//! beats restart, and restart is only honored for local (voice/keyboard)
//! input; in chat the phrase is ordinary text.

use crate::message::Source;

/// Intercepted command, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordAction {
    /// Abort the current exchange
    Cancel,
    /// Start a fresh conversation
    Reset,
    /// Restart the assistant process
    Restart,
}

/// Configured keyword phrase lists
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    cancel: Vec<String>,
    reset: Vec<String>,
    restart: Vec<String>,
}

impl KeywordSet {
    /// Create a keyword set; phrases are normalized to lowercase
    #[must_use]
    pub fn new(cancel: Vec<String>, reset: Vec<String>, restart: Vec<String>) -> Self {
        let normalize = |phrases: Vec<String>| -> Vec<String> {
            phrases
                .into_iter()
                .map(|p| p.to_lowercase().trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        Self {
            cancel: normalize(cancel),
            reset: normalize(reset),
            restart: normalize(restart),
        }
    }

    /// Match `text` against the phrase lists in priority order
    ///
    /// Matching is case-insensitive substring containment. Restart phrases
    /// are suppressed for chat input, where they are forwarded to the AI as
    /// ordinary text.
    #[must_use]
    pub fn intercept(&self, text: &str, source: Source) -> Option<KeywordAction> {
        let normalized = text.to_lowercase();

        if contains_any(&normalized, &self.cancel) {
            return Some(KeywordAction::Cancel);
        }
        if contains_any(&normalized, &self.reset) {
            return Some(KeywordAction::Reset);
        }
        if source != Source::Chat && contains_any(&normalized, &self.restart) {
            return Some(KeywordAction::Restart);
        }

        None
    }
}

/// Whether `text` contains any of the (lowercase) phrases
fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| text.contains(p.as_str()))
}
