//! Text-to-speech (TTS) processing

use crate::config::TtsConfig;
use crate::{Error, Result};

/// `OpenAI` TTS PCM output sample rate (16-bit mono)
pub const TTS_SAMPLE_RATE: u32 = 24000;

/// Synthesizes speech from text via the `OpenAI` TTS API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing.
    pub fn new(config: &TtsConfig, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
        })
    }

    /// Synthesize text to raw PCM bytes (int16 little-endian, 24kHz mono)
    ///
    /// # Errors
    ///
    /// Returns error if the text is empty or the API call fails.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
            speed: f32,
        }

        if text.trim().is_empty() {
            return Err(Error::Tts("no text to speak".to_string()));
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        tracing::debug!(bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}
