//! Speech recording with voice activity detection
//!
//! Records audio after wake-trigger activation until silence is detected,
//! using the Silero VAD for speech/silence classification. All audio is
//! accumulated regardless of speech status; only the stop decision follows
//! the speech-probability signal.

use voice_activity_detector::VoiceActivityDetector;

use crate::{Error, Result};

/// VAD frame size in samples (32ms at 16kHz)
pub const VAD_FRAME_SIZE: usize = 512;

/// Records speech from audio chunks with VAD-based endpoint detection
pub struct SpeechRecorder {
    sample_rate: u32,
    vad_threshold: f32,
    silence_frame_limit: usize,
    max_frame_limit: usize,
    vad: VoiceActivityDetector,
    buffer: Vec<u8>,
    pending: Vec<i16>,
    silence_frames: usize,
    total_frames: usize,
    recording: bool,
}

impl SpeechRecorder {
    /// Create a recorder
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `vad_threshold` - Speech probability threshold (0.0-1.0)
    /// * `silence_duration_sec` - Seconds of silence that end a recording
    /// * `max_duration_sec` - Maximum recording duration in seconds
    ///
    /// # Errors
    ///
    /// Returns error if the VAD model cannot be initialized.
    pub fn new(
        sample_rate: u32,
        vad_threshold: f32,
        silence_duration_sec: f32,
        max_duration_sec: f32,
    ) -> Result<Self> {
        let vad = build_vad(sample_rate)?;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames_for = |secs: f32| -> usize {
            let frame_duration = VAD_FRAME_SIZE as f32 / sample_rate as f32;
            (secs / frame_duration) as usize
        };

        Ok(Self {
            sample_rate,
            vad_threshold,
            silence_frame_limit: frames_for(silence_duration_sec),
            max_frame_limit: frames_for(max_duration_sec),
            vad,
            buffer: Vec::new(),
            pending: Vec::new(),
            silence_frames: 0,
            total_frames: 0,
            recording: false,
        })
    }

    /// Start a new recording session
    ///
    /// # Errors
    ///
    /// Returns error if the VAD model cannot be re-initialized.
    pub fn start(&mut self) -> Result<()> {
        self.buffer.clear();
        self.pending.clear();
        self.silence_frames = 0;
        self.total_frames = 0;
        self.recording = true;
        // Fresh model state so a previous utterance cannot bleed in
        self.vad = build_vad(self.sample_rate)?;
        Ok(())
    }

    /// Process an audio chunk and check whether recording should continue
    ///
    /// The chunk is split into VAD-sized frames for speech detection; a
    /// partial trailing frame is carried over to the next chunk.
    ///
    /// Returns true to keep recording, false when done (silence or max
    /// duration reached).
    pub fn process_chunk(&mut self, chunk: &[i16]) -> bool {
        if !self.recording {
            return false;
        }

        self.buffer
            .extend(chunk.iter().flat_map(|s| s.to_le_bytes()));
        self.pending.extend_from_slice(chunk);

        let mut offset = 0;
        while offset + VAD_FRAME_SIZE <= self.pending.len() {
            let frame = &self.pending[offset..offset + VAD_FRAME_SIZE];
            let speech_prob = self.vad.predict(frame.iter().copied());

            if speech_prob >= self.vad_threshold {
                self.silence_frames = 0;
            } else {
                self.silence_frames += 1;
            }

            self.total_frames += 1;
            offset += VAD_FRAME_SIZE;

            if self.silence_frames >= self.silence_frame_limit {
                tracing::debug!(frames = self.total_frames, "recording ended on silence");
                self.recording = false;
                break;
            }
            if self.total_frames >= self.max_frame_limit {
                tracing::debug!(frames = self.total_frames, "recording hit max duration");
                self.recording = false;
                break;
            }
        }
        self.pending.drain(..offset);

        self.recording
    }

    /// The complete recorded audio as raw PCM bytes (int16 little-endian)
    #[must_use]
    pub fn get_audio(&self) -> Vec<u8> {
        self.buffer.clone()
    }

    /// Whether the recorder is currently active
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }
}

/// Build a Silero VAD instance for the given sample rate
fn build_vad(sample_rate: u32) -> Result<VoiceActivityDetector> {
    VoiceActivityDetector::builder()
        .sample_rate(i64::from(sample_rate))
        .chunk_size(VAD_FRAME_SIZE)
        .build()
        .map_err(|e| Error::Recording(format!("VAD init failed: {e}")))
}
