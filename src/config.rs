//! Configuration management
//!
//! Settings load from a YAML file (`config.yaml`), with environment
//! variables layered over the file for secrets (env > file > default).
//! All configuration is resolved once at startup and passed into
//! constructors; nothing in the core reads globals.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio capture and recording settings
    pub audio: AudioConfig,

    /// Wake trigger settings
    pub wake_word: WakeWordConfig,

    /// Speech-to-text settings
    pub stt: SttConfig,

    /// Text-to-speech settings
    pub tts: TtsConfig,

    /// AI agent backend settings
    pub ai: AiConfig,

    /// Command keyword phrase lists
    pub keywords: KeywordsConfig,

    /// Matrix chat bridge settings
    pub matrix: MatrixConfig,

    /// API keys, resolved from the environment
    #[serde(skip)]
    pub api_keys: ApiKeys,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Microphone read chunk size in samples
    pub chunk_size: usize,

    /// Speech probability threshold for the recorder (0.0-1.0)
    pub vad_threshold: f32,

    /// Seconds of silence that end a recording
    pub silence_threshold_sec: f32,

    /// Maximum recording duration in seconds
    pub max_recording_sec: f32,

    /// Minimum command duration in seconds; shorter captures are dropped
    pub min_command_sec: f32,

    /// Directory containing cue WAV files (ding, processing, ready, error)
    pub sounds_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_size: 1280,
            vad_threshold: 0.5,
            silence_threshold_sec: 1.5,
            max_recording_sec: 30.0,
            min_command_sec: 0.5,
            sounds_dir: None,
        }
    }
}

/// Wake trigger configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeWordConfig {
    /// Detection threshold (0.0-1.0); higher means fewer false positives
    pub threshold: f32,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self { threshold: 0.55 }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Whisper model name
    pub model: String,

    /// ISO-639-1 language code
    pub language: String,

    /// Hallucinated phrases stripped from every transcript
    pub filter_phrases: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: "de".to_string(),
            filter_phrases: Vec::new(),
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// TTS model name
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "onyx".to_string(),
            speed: 1.0,
        }
    }
}

/// AI agent backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Agent CLI binary name or path
    pub command: String,

    /// Directory the agent operates in (the notes folder)
    pub working_directory: PathBuf,

    /// Path to a system prompt file, resolved at load time
    pub system_prompt_path: Option<PathBuf>,

    /// System prompt text, read from `system_prompt_path`
    #[serde(skip)]
    pub system_prompt: String,

    /// Hard wall-clock deadline for one agent call, in seconds
    pub timeout_sec: u64,

    /// Whether to reattach to the most recent prior session on startup
    pub resume_session: bool,

    /// Grace period between the terminate signal and a forceful kill
    pub kill_grace_sec: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            working_directory: PathBuf::from("."),
            system_prompt_path: None,
            system_prompt: String::new(),
            timeout_sec: 120,
            resume_session: false,
            kill_grace_sec: 3,
        }
    }
}

/// Command keyword phrase lists
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordsConfig {
    /// Phrases that abort the current exchange
    pub cancel: Vec<String>,

    /// Phrases that start a fresh conversation
    pub reset: Vec<String>,

    /// Phrases that restart the assistant process
    pub restart: Vec<String>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            cancel: vec!["stopp".to_string(), "abbrechen".to_string()],
            reset: vec!["neues gespräch".to_string(), "neue unterhaltung".to_string()],
            restart: vec!["neustart".to_string()],
        }
    }
}

/// Matrix chat bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Enable the Matrix bridge
    pub enabled: bool,

    /// Homeserver URL (e.g. `https://matrix.org`)
    pub homeserver: String,

    /// Bot user ID (e.g. `@jarvis:matrix.org`)
    pub user_id: String,

    /// The single room the bridge operates in
    pub room_id: String,

    /// Matrix user IDs allowed to interact with the bot
    pub allowed_users: Vec<String>,

    /// Access token; `MATRIX_ACCESS_TOKEN` takes precedence
    pub access_token: Option<String>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT and TTS)
    pub openai: Option<String>,
}

/// Default config file path: `~/.config/jarvis/config.yaml`
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/jarvis/config.yaml"),
        |d| d.config_dir().join("jarvis").join("config.yaml"),
    )
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// A missing file yields the built-in defaults; a present but malformed
    /// file is a fatal error.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be parsed, the system prompt file
    /// cannot be read, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);

        let mut config: Self = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&raw)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.ai.working_directory = expand_tilde(&config.ai.working_directory);
        if let Some(dir) = config.audio.sounds_dir.take() {
            config.audio.sounds_dir = Some(expand_tilde(&dir));
        }

        if let Some(prompt_path) = config.ai.system_prompt_path.clone() {
            let prompt_path = expand_tilde(&prompt_path);
            if prompt_path.exists() {
                config.ai.system_prompt = std::fs::read_to_string(&prompt_path)?.trim().to_string();
            } else {
                tracing::warn!(
                    path = %prompt_path.display(),
                    "system prompt file not found, continuing without"
                );
            }
        }

        config.api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
        };
        if let Ok(token) = std::env::var("MATRIX_ACCESS_TOKEN") {
            config.matrix.access_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the resolved configuration
    ///
    /// # Errors
    ///
    /// Returns error for out-of-range values or a partially configured
    /// Matrix bridge.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.audio.vad_threshold) {
            return Err(Error::Config(
                "audio.vad_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.audio.min_command_sec < 0.0 {
            return Err(Error::Config(
                "audio.min_command_sec must not be negative".to_string(),
            ));
        }
        if self.ai.timeout_sec == 0 {
            return Err(Error::Config("ai.timeout_sec must be non-zero".to_string()));
        }

        if self.matrix.enabled {
            if self.matrix.homeserver.is_empty()
                || self.matrix.user_id.is_empty()
                || self.matrix.room_id.is_empty()
            {
                return Err(Error::Config(
                    "matrix requires homeserver, user_id and room_id".to_string(),
                ));
            }
            if self.matrix.access_token.as_deref().unwrap_or_default().is_empty() {
                return Err(Error::Config(
                    "matrix requires access_token or MATRIX_ACCESS_TOKEN".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };

    if s == "~" || s.starts_with("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            let home = base.home_dir();
            return if s == "~" {
                home.to_path_buf()
            } else {
                home.join(&s[2..])
            };
        }
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.ai.timeout_sec, 120);
        assert!(!config.ai.resume_session);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let raw = r"
audio:
  min_command_sec: 1.0
ai:
  working_directory: /tmp/notes
  resume_session: true
keywords:
  cancel: [halt]
";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert!((config.audio.min_command_sec - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.ai.resume_session);
        assert_eq!(config.keywords.cancel, vec!["halt".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.keywords.restart, vec!["neustart".to_string()]);
    }

    #[test]
    fn matrix_enabled_requires_credentials() {
        let mut config = Config::default();
        config.matrix.enabled = true;
        config.matrix.homeserver = "https://matrix.org".to_string();
        config.matrix.user_id = "@jarvis:matrix.org".to_string();
        config.matrix.room_id = "!room:matrix.org".to_string();
        assert!(config.validate().is_err());

        config.matrix.access_token = Some("syt_secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_vad_threshold() {
        let mut config = Config::default();
        config.audio.vad_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde(Path::new("~/notes"));
        assert!(!expanded.to_string_lossy().starts_with('~'));

        let absolute = expand_tilde(Path::new("/var/notes"));
        assert_eq!(absolute, PathBuf::from("/var/notes"));
    }
}
