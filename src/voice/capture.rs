//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::{Error, Result};

/// Microphone / audio capture device
///
/// One blocking reader pulls fixed-size PCM chunks; the capture callback
/// fills a shared buffer behind the scenes.
pub trait AudioInput {
    /// Read one chunk of PCM audio (int16, mono); blocks until available
    ///
    /// # Errors
    ///
    /// Returns error if the capture stream died.
    fn read_chunk(&mut self) -> Result<Vec<i16>>;

    /// Capture sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Shared state between the cpal callback and the reader
struct Shared {
    samples: Mutex<VecDeque<i16>>,
    available: Condvar,
}

/// Captures audio from the default input device via cpal
pub struct CpalAudioInput {
    shared: Arc<Shared>,
    sample_rate: u32,
    chunk_size: usize,
    // Held to keep the stream alive; dropped on close
    _stream: Stream,
}

impl CpalAudioInput {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the requested
    /// configuration is unsupported.
    pub fn new(sample_rate: u32, chunk_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

        let shared = Arc::new(Shared {
            samples: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        });

        let callback_shared = Arc::clone(&shared);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = callback_shared.samples.lock() {
                        for &sample in data {
                            #[allow(clippy::cast_possible_truncation)]
                            buf.push_back((sample * 32767.0).clamp(-32768.0, 32767.0) as i16);
                        }
                        callback_shared.available.notify_one();
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            chunk_size,
            "audio capture started"
        );

        Ok(Self {
            shared,
            sample_rate,
            chunk_size,
            _stream: stream,
        })
    }
}

impl AudioInput for CpalAudioInput {
    fn read_chunk(&mut self) -> Result<Vec<i16>> {
        let mut buf = self
            .shared
            .samples
            .lock()
            .map_err(|_| Error::Audio("capture buffer poisoned".to_string()))?;

        // Bounded wait so a stalled device cannot block the producer loop
        // (and with it, shutdown) forever; an empty chunk is valid output.
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(200);
        while buf.len() < self.chunk_size {
            let now = std::time::Instant::now();
            if now >= deadline {
                let available = buf.len();
                return Ok(buf.drain(..available).collect());
            }
            let (guard, _timeout) = self
                .shared
                .available
                .wait_timeout(buf, deadline - now)
                .map_err(|_| Error::Audio("capture buffer poisoned".to_string()))?;
            buf = guard;
        }

        Ok(buf.drain(..self.chunk_size).collect())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Wrap raw PCM bytes (int16 little-endian, mono) as a WAV file for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
