//! Voice producer loop
//!
//! Owns the microphone: idle wake-trigger listening, the blocking
//! record-until-silence capture, and the cancellation side-channel that keeps
//! listening while the worker is blocked in an agent call for a voice turn.
//! Runs on its own OS thread; capture stays synchronous here because only
//! this loop holds the live mic stream.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{
    AudioInput, Cue, SpeechRecorder, Transcriber, VoiceOutput, WakeWordDetector,
    create_audio_input,
};
use crate::Result;
use crate::agent::ConversationalAgent;
use crate::config::{AudioConfig, WakeWordConfig};
use crate::keywords::{KeywordAction, KeywordSet};
use crate::message::{AudioClip, Envelope, Source};
use crate::ui::{Phase, StatusBoard};
use crate::worker::{NOTICE_CANCELLED, QueueHandle, TurnSignals};

/// The voice producer and its collaborators
pub struct VoiceProducer {
    /// Audio capture settings
    pub audio: AudioConfig,
    /// Wake trigger settings
    pub wake_word: WakeWordConfig,
    /// Command keywords, for the cancel side-channel
    pub keywords: KeywordSet,
    /// Work queue handle
    pub queue: QueueHandle,
    /// Worker turn flags
    pub signals: Arc<TurnSignals>,
    /// AI backend, for direct `cancel` calls
    pub agent: Arc<dyn ConversationalAgent>,
    /// Transcriber for side-channel captures
    pub transcriber: Arc<dyn Transcriber>,
    /// Cue playback and spoken acknowledgements
    pub voice: Arc<dyn VoiceOutput>,
    /// Shared status display
    pub status: Arc<StatusBoard>,
    /// Cooperative stop signal
    pub stop: CancellationToken,
    /// Runtime handle for async collaborator calls from this thread
    pub runtime: tokio::runtime::Handle,
}

impl VoiceProducer {
    /// Run the producer loop until stopped; blocking
    ///
    /// # Errors
    ///
    /// Returns error only for unrecoverable device failures; per-turn
    /// failures are logged and the loop continues.
    pub fn run(self) -> Result<()> {
        let mut mic = create_audio_input(&self.audio)?;
        let mut wake = WakeWordDetector::new(self.wake_word.threshold);
        let mut recorder = SpeechRecorder::new(
            self.audio.sample_rate,
            self.audio.vad_threshold,
            self.audio.silence_threshold_sec,
            self.audio.max_recording_sec,
        )?;

        tracing::info!("voice producer started");

        while !self.stop.is_cancelled() {
            let chunk = mic.read_chunk()?;
            if !wake.process(&chunk) {
                continue;
            }
            wake.reset();

            if self.signals.voice_ask_active() {
                // Out-of-band listen during the outstanding agent call
                if let Err(e) = self.side_capture(mic.as_mut(), &mut recorder) {
                    tracing::warn!(error = %e, "side capture failed");
                }
                continue;
            }

            if let Err(e) = self.capture_turn(mic.as_mut(), &mut recorder) {
                tracing::warn!(error = %e, "voice capture failed");
                self.status.set_phase(Phase::Listening);
            }
        }

        tracing::info!("voice producer stopped");
        Ok(())
    }

    /// Record one command and enqueue it
    fn capture_turn(
        &self,
        mic: &mut dyn AudioInput,
        recorder: &mut SpeechRecorder,
    ) -> Result<()> {
        tracing::info!("wake trigger fired");
        self.runtime.block_on(self.voice.play_cue(Cue::Ding));

        self.status.set_phase(Phase::Recording);
        self.status.set_transcription("");
        self.status.set_response("");

        let audio = self.record(mic, recorder)?;
        if audio.is_empty() {
            self.status.set_phase(Phase::Listening);
            return Ok(());
        }

        self.runtime.block_on(self.voice.play_cue(Cue::Processing));
        self.queue
            .enqueue(Envelope::voice_audio(audio, self.audio.sample_rate));
        Ok(())
    }

    /// Nested capture while a voice turn is outstanding; cancels the agent
    /// call if the transcript contains a cancel phrase
    fn side_capture(
        &self,
        mic: &mut dyn AudioInput,
        recorder: &mut SpeechRecorder,
    ) -> Result<()> {
        tracing::debug!("wake trigger during outstanding turn, listening for cancel");

        let audio = self.record(mic, recorder)?;
        let clip = AudioClip::pcm(audio, self.audio.sample_rate);
        match clip.duration_secs() {
            Some(duration) if duration >= self.audio.min_command_sec => {}
            _ => return Ok(()),
        }

        let text = match self.runtime.block_on(self.transcriber.transcribe(&clip)) {
            Ok(text) => self.transcriber.filter_transcript(&text),
            Err(e) => {
                tracing::debug!(error = %e, "side capture transcription failed");
                return Ok(());
            }
        };

        if self.keywords.intercept(&text, Source::Voice) == Some(KeywordAction::Cancel) {
            tracing::info!(transcript = %text, "cancel phrase heard mid-turn");
            self.runtime.block_on(self.agent.cancel());
            self.runtime.block_on(async {
                if self.voice.speak(NOTICE_CANCELLED).await.is_err() {
                    self.voice.play_cue(Cue::Error).await;
                }
            });
        } else {
            tracing::debug!(transcript = %text, "side capture was not a cancel command");
        }

        Ok(())
    }

    /// Blocking record-until-silence
    fn record(
        &self,
        mic: &mut dyn AudioInput,
        recorder: &mut SpeechRecorder,
    ) -> Result<Vec<u8>> {
        recorder.start()?;
        while recorder.process_chunk(&mic.read_chunk()?) {
            if self.stop.is_cancelled() {
                break;
            }
        }
        Ok(recorder.get_audio())
    }
}
