//! Error types for the Jarvis gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recording error
    #[error("recording error: {0}")]
    Recording(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// The agent subprocess exceeded its configured deadline
    #[error("agent did not respond within {secs}s")]
    AgentTimeout {
        /// Configured deadline in seconds
        secs: u64,
    },

    /// The agent subprocess exited with a non-zero status
    #[error("agent exited with code {code}: {stderr}")]
    AgentExit {
        /// Process exit code (-1 if terminated by signal)
        code: i32,
        /// Captured stderr output
        stderr: String,
    },

    /// The agent subprocess completed but produced no usable text
    #[error("agent returned an empty response")]
    AgentEmpty,

    /// The outstanding agent call was cancelled from another task
    #[error("agent call cancelled")]
    AgentCancelled,

    /// Failed to spawn or communicate with the agent subprocess
    #[error("agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether this is the agent-timeout failure kind
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::AgentTimeout { .. })
    }

    /// Whether this is the cancellation failure kind
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::AgentCancelled)
    }
}
