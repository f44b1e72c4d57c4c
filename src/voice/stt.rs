//! Speech-to-text (STT) processing

use async_trait::async_trait;
use regex::Regex;

use super::Transcriber;
use super::capture::pcm_to_wav;
use crate::config::SttConfig;
use crate::message::{AudioClip, ClipEncoding};
use crate::{Error, Result};

/// Response from the `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes audio using the `OpenAI` Whisper API
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
    filter_phrases: Vec<Regex>,
    whitespace: Regex,
}

impl WhisperTranscriber {
    /// Create a new transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing.
    pub fn new(config: &SttConfig, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        let filter_phrases = config
            .filter_phrases
            .iter()
            .filter_map(|phrase| {
                regex::RegexBuilder::new(&regex::escape(phrase))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        tracing::warn!(phrase, error = %e, "unusable filter phrase");
                        e
                    })
                    .ok()
            })
            .collect();

        // \s+ collapse; infallible pattern
        let whitespace = Regex::new(r"\s+").map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
            filter_phrases,
            whitespace,
        })
    }

    /// Send one file to the transcription endpoint
    async fn request(&self, data: Vec<u8>, filename: String, mime: &str) -> Result<String> {
        tracing::debug!(bytes = data.len(), filename = %filename, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(data)
                    .file_name(filename)
                    .mime_str(mime)
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("Whisper response parse error: {e}")))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        if clip.data.is_empty() {
            return Err(Error::Stt("no audio data to transcribe".to_string()));
        }

        match &clip.encoding {
            ClipEncoding::Pcm16 { sample_rate } => {
                let wav = pcm_to_wav(&clip.data, *sample_rate)
                    .map_err(|e| Error::Stt(e.to_string()))?;
                self.request(wav, "audio.wav".to_string(), "audio/wav").await
            }
            ClipEncoding::Container { filename } => {
                let mime = mime_for(filename);
                self.request(clip.data.clone(), filename.clone(), mime).await
            }
        }
    }

    fn filter_transcript(&self, text: &str) -> String {
        let mut text = text.to_string();
        for phrase in &self.filter_phrases {
            text = phrase.replace_all(&text, "").into_owned();
        }
        self.whitespace.replace_all(&text, " ").trim().to_string()
    }
}

/// MIME type from a filename extension
fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("ogg" | "oga") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcriber_with_filters(phrases: &[&str]) -> WhisperTranscriber {
        let config = SttConfig {
            filter_phrases: phrases.iter().map(ToString::to_string).collect(),
            ..SttConfig::default()
        };
        WhisperTranscriber::new(&config, "sk-test".to_string()).unwrap()
    }

    #[test]
    fn requires_api_key() {
        let config = SttConfig::default();
        assert!(WhisperTranscriber::new(&config, String::new()).is_err());
    }

    #[test]
    fn filter_strips_phrases_case_insensitively() {
        let t = transcriber_with_filters(&["Untertitel im Auftrag des ZDF"]);
        let cleaned = t.filter_transcript("Hallo UNTERTITEL IM AUFTRAG DES zdf Welt");
        assert_eq!(cleaned, "Hallo Welt");
    }

    #[test]
    fn filter_collapses_whitespace() {
        let t = transcriber_with_filters(&[]);
        assert_eq!(t.filter_transcript("  viel \n zu\tviel  Raum "), "viel zu viel Raum");
    }

    #[test]
    fn filter_may_leave_nothing() {
        let t = transcriber_with_filters(&["danke fürs zuschauen"]);
        assert_eq!(t.filter_transcript(" Danke fürs Zuschauen "), "");
    }

    #[test]
    fn mime_detection_from_extension() {
        assert_eq!(mime_for("note.ogg"), "audio/ogg");
        assert_eq!(mime_for("Voice.MP3"), "audio/mpeg");
        assert_eq!(mime_for("unknown.bin"), "application/octet-stream");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
