//! Voice processing module
//!
//! Audio capture, wake trigger, VAD-gated recording, playback with sound
//! cues, and the Whisper/TTS API adapters. The worker talks to this module
//! only through the [`Transcriber`] and [`VoiceOutput`] traits.

mod capture;
mod playback;
mod producer;
mod recorder;
mod stt;
mod tts;
mod wake;

use async_trait::async_trait;

pub use capture::{AudioInput, CpalAudioInput, pcm_to_wav};
pub use playback::{AudioOutput, CpalAudioOutput, SilentOutput, Speaker};
pub use producer::VoiceProducer;
pub use recorder::{SpeechRecorder, VAD_FRAME_SIZE};
pub use stt::WhisperTranscriber;
pub use tts::{TTS_SAMPLE_RATE, TextToSpeech};
pub use wake::WakeWordDetector;

use crate::Result;
use crate::config::AudioConfig;
use crate::message::AudioClip;

/// Pre-recorded sound cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Wake trigger confirmation
    Ding,
    /// Recording finished, request underway
    Processing,
    /// Ready for the next command
    Ready,
    /// Error tone, also the synthesis-failure fallback
    Error,
}

impl Cue {
    /// WAV filename inside the sounds directory
    #[must_use]
    pub const fn filename(self) -> &'static str {
        match self {
            Self::Ding => "ding.wav",
            Self::Processing => "processing.wav",
            Self::Ready => "ready.wav",
            Self::Error => "error.wav",
        }
    }
}

/// Speech-to-text collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio clip to text
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` if the transcription API call fails.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;

    /// Strip known hallucinated phrases and normalize whitespace (pure)
    fn filter_transcript(&self, text: &str) -> String;
}

/// Speech synthesis plus sound cues for the voice channel
#[async_trait]
pub trait VoiceOutput: Send + Sync {
    /// Synthesize and play the given text
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis or playback fails.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Play a sound cue; missing cue files and playback failures are
    /// swallowed, this never fails
    async fn play_cue(&self, cue: Cue);
}

/// Open the platform microphone
///
/// # Errors
///
/// Returns error if no suitable input device is available.
pub fn create_audio_input(config: &AudioConfig) -> Result<Box<dyn AudioInput>> {
    Ok(Box::new(CpalAudioInput::new(
        config.sample_rate,
        config.chunk_size,
    )?))
}

/// Open the platform speaker
///
/// # Errors
///
/// Returns error if no suitable output device is available.
pub fn create_audio_output() -> Result<std::sync::Arc<dyn AudioOutput>> {
    Ok(std::sync::Arc::new(CpalAudioOutput::new()?))
}
