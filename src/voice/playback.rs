//! Audio playback to speakers
//!
//! The cpal output path plus the [`Speaker`], which combines TTS synthesis,
//! cue playback and the error-tone fallback behind the [`VoiceOutput`] trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use super::{Cue, VoiceOutput};
use crate::voice::tts::{TTS_SAMPLE_RATE, TextToSpeech};
use crate::{Error, Result};

/// Speaker / audio playback device
pub trait AudioOutput: Send + Sync {
    /// Play PCM samples (int16 mono) to completion; blocking
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or playback fails.
    fn play_pcm(&self, samples: &[i16], sample_rate: u32) -> Result<()>;
}

/// Plays audio to the default output device via cpal
pub struct CpalAudioOutput;

impl CpalAudioOutput {
    /// Verify an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self)
    }
}

impl AudioOutput for CpalAudioOutput {
    #[allow(clippy::too_many_lines)]
    fn play_pcm(&self, samples: &[i16], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = config.channels as usize;

        let samples: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
        let sample_count = samples.len();

        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(Mutex::new(false));

        let samples = Arc::new(samples);
        let cb_samples = Arc::clone(&samples);
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = cb_position.lock().unwrap();

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < cb_samples.len() {
                            cb_samples[*pos]
                        } else {
                            *cb_finished.lock().unwrap() = true;
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }

                        if *pos < cb_samples.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Wait for playback to finish, bounded by the clip duration
        let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate);
        let timeout = std::time::Duration::from_millis(duration_ms + 500);
        let start = std::time::Instant::now();

        while !*finished.lock().unwrap() {
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        std::thread::sleep(std::time::Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }
}

/// A loaded cue clip
#[derive(Clone)]
struct CueClip {
    samples: Arc<Vec<i16>>,
    sample_rate: u32,
}

/// Voice-channel output: synthesized speech plus sound cues
pub struct Speaker {
    tts: TextToSpeech,
    output: Arc<dyn AudioOutput>,
    cues: HashMap<Cue, CueClip>,
}

impl Speaker {
    /// Create a speaker, loading cue WAVs from the sounds directory
    ///
    /// Missing cue files are logged and skipped; playing an unloaded cue is
    /// a no-op.
    #[must_use]
    pub fn new(tts: TextToSpeech, output: Arc<dyn AudioOutput>, sounds_dir: Option<&Path>) -> Self {
        let mut cues = HashMap::new();

        if let Some(dir) = sounds_dir {
            for cue in [Cue::Ding, Cue::Processing, Cue::Ready, Cue::Error] {
                let path = dir.join(cue.filename());
                match load_wav(&path) {
                    Ok(clip) => {
                        cues.insert(cue, clip);
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "cue not loaded");
                    }
                }
            }
        }

        Self { tts, output, cues }
    }
}

#[async_trait]
impl VoiceOutput for Speaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let pcm = self.tts.synthesize(text).await?;

        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let output = Arc::clone(&self.output);
        tokio::task::spawn_blocking(move || output.play_pcm(&samples, TTS_SAMPLE_RATE))
            .await
            .map_err(|e| Error::Tts(format!("playback task failed: {e}")))?
    }

    async fn play_cue(&self, cue: Cue) {
        let Some(clip) = self.cues.get(&cue).cloned() else {
            return;
        };

        let output = Arc::clone(&self.output);
        let result = tokio::task::spawn_blocking(move || {
            output.play_pcm(&clip.samples, clip.sample_rate)
        })
        .await;

        match result {
            Ok(Err(e)) => tracing::warn!(cue = ?cue, error = %e, "cue playback failed"),
            Err(e) => tracing::warn!(cue = ?cue, error = %e, "cue playback task failed"),
            Ok(Ok(())) => {}
        }
    }
}

/// No-op voice output for headless mode
pub struct SilentOutput;

#[async_trait]
impl VoiceOutput for SilentOutput {
    async fn speak(&self, text: &str) -> Result<()> {
        tracing::debug!(text = %text, "voice disabled, dropping spoken response");
        Ok(())
    }

    async fn play_cue(&self, _cue: Cue) {}
}

/// Load a mono WAV file as int16 samples
fn load_wav(path: &Path) -> Result<CueClip> {
    let mut reader = hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| {
                s.map(|f| {
                    #[allow(clippy::cast_possible_truncation)]
                    let i = (f * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    i
                })
            })
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    Ok(CueClip {
        samples: Arc::new(samples),
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_wav_reads_cue_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ding.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..2400i16 {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();

        let clip = load_wav(&path).unwrap();
        assert_eq!(clip.samples.len(), 2400);
        assert_eq!(clip.sample_rate, 24000);
    }

    #[test]
    fn load_wav_missing_file_errors() {
        assert!(load_wav(Path::new("/nonexistent/ding.wav")).is_err());
    }

    #[tokio::test]
    async fn silent_output_swallows_everything() {
        let out = SilentOutput;
        out.speak("hallo").await.unwrap();
        out.play_cue(Cue::Error).await;
    }
}
