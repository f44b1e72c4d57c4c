//! Work queue and turn worker
//!
//! The single place where ordering, conversational statefulness and
//! cross-channel routing are decided. Producers enqueue envelopes from their
//! own tasks; one worker drains the queue strictly in arrival order and runs
//! the turn pipeline: transcribe if audio, filter, intercept command
//! keywords, ask the agent, route the response. A failed turn is logged and
//! never kills the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::agent::ConversationalAgent;
use crate::channels::ChatReply;
use crate::keywords::{KeywordAction, KeywordSet};
use crate::message::{Envelope, Payload, Source};
use crate::ui::{Phase, StatusBoard};
use crate::voice::{Cue, Transcriber, VoiceOutput};

/// How long one queue poll blocks before re-checking the stop signal
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Prefix marking chat-sourced requests, where rich-text replies are fine
const CHAT_MESSAGE_PREFIX: &str =
    "[Chat-Nachricht: die Antwort darf Markdown und Links enthalten] ";

/// Spoken/printed acknowledgement after a cancel keyword
pub const NOTICE_CANCELLED: &str = "Okay, abgebrochen.";

/// Spoken/printed acknowledgement after a reset keyword
pub const NOTICE_RESET: &str = "Okay, wir starten ein neues Gespräch.";

/// Notice for a failed transcription
pub const NOTICE_STT_ERROR: &str = "Fehler bei der Transkription.";

/// Notice for an agent call that hit its deadline
pub const NOTICE_AGENT_TIMEOUT: &str = "Die Anfrage hat zu lange gedauert.";

/// Notice for any other agent failure
pub const NOTICE_AGENT_ERROR: &str = "Es gab einen Fehler bei der Verarbeitung.";

/// Flags shared between the worker and the voice producer
///
/// The producer uses these to decide when its cancellation side-channel is
/// armed: only while the worker is blocked in `ask` for a voice turn.
#[derive(Debug, Default)]
pub struct TurnSignals {
    voice_ask: AtomicBool,
}

impl TurnSignals {
    fn set_voice_ask(&self, active: bool) {
        self.voice_ask.store(active, Ordering::SeqCst);
    }

    /// Whether a voice-sourced agent call is currently outstanding
    #[must_use]
    pub fn voice_ask_active(&self) -> bool {
        self.voice_ask.load(Ordering::SeqCst)
    }
}

/// Producer-side handle to the work queue
///
/// Cloneable; `enqueue` never blocks and is callable from any task.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl QueueHandle {
    /// Enqueue one envelope for processing
    pub fn enqueue(&self, envelope: Envelope) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(envelope).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("worker gone, dropping envelope");
        }
    }

    /// Number of envelopes enqueued but not yet fully processed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued envelope has been fully processed
    ///
    /// Used at shutdown so no envelope is discarded mid-flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Collaborators the worker routes between
pub struct Collaborators {
    /// The conversational AI backend
    pub agent: Arc<dyn ConversationalAgent>,
    /// Speech-to-text plus transcript filtering
    pub transcriber: Arc<dyn Transcriber>,
    /// Speech synthesis and sound cues for the voice channel
    pub voice: Arc<dyn VoiceOutput>,
    /// Outbound delivery queue consumed by the chat bridge
    pub chat_outbox: mpsc::UnboundedSender<ChatReply>,
    /// Shared status display
    pub status: Arc<StatusBoard>,
}

/// The single turn worker
pub struct Worker {
    queue: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    collab: Collaborators,
    signals: Arc<TurnSignals>,
    keywords: KeywordSet,
    min_command_sec: f32,
    stop: CancellationToken,
    restart: CancellationToken,
}

impl Worker {
    /// Create a worker and its producer-side queue handle
    ///
    /// `stop` requests a cooperative exit once the queue is drained;
    /// `restart` is cancelled by the worker when a restart keyword fires.
    #[must_use]
    pub fn new(
        collab: Collaborators,
        keywords: KeywordSet,
        min_command_sec: f32,
        stop: CancellationToken,
        restart: CancellationToken,
    ) -> (Self, QueueHandle, Arc<TurnSignals>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());
        let signals = Arc::new(TurnSignals::default());

        let handle = QueueHandle {
            tx,
            pending: Arc::clone(&pending),
            drained: Arc::clone(&drained),
        };

        let worker = Self {
            queue: rx,
            pending,
            drained,
            collab,
            signals: Arc::clone(&signals),
            keywords,
            min_command_sec,
            stop,
            restart,
        };

        (worker, handle, signals)
    }

    /// Run the worker loop until stopped
    ///
    /// Blocks on queue pop with a bounded poll timeout so the stop signal is
    /// observed between items. The in-flight item is always finished; queued
    /// items are drained before the stop flag takes effect.
    pub async fn run(mut self) {
        tracing::info!("worker started");

        loop {
            match tokio::time::timeout(QUEUE_POLL_INTERVAL, self.queue.recv()).await {
                Ok(Some(envelope)) => {
                    self.process(envelope).await;
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    self.drained.notify_waiters();
                }
                Ok(None) => break,
                Err(_) => {
                    if self.stop.is_cancelled() {
                        break;
                    }
                }
            }
        }

        tracing::info!("worker stopped");
    }

    /// Run the turn pipeline for one envelope; never propagates errors
    async fn process(&self, envelope: Envelope) {
        let source = envelope.source;
        let room = envelope.channel_ref.clone();
        let was_audio = envelope.is_audio();

        self.collab.status.set_phase(Phase::Processing);

        let text = match envelope.payload {
            Payload::Text(text) => text,
            Payload::Audio(clip) => {
                if let Some(duration) = clip.duration_secs() {
                    if duration < self.min_command_sec {
                        tracing::debug!(duration, "dropping short capture");
                        self.collab.status.set_phase(Phase::Listening);
                        return;
                    }
                }

                match self.collab.transcriber.transcribe(&clip).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "transcription failed");
                        self.notify_error(source, room.as_deref(), NOTICE_STT_ERROR).await;
                        self.collab.status.set_phase(Phase::Listening);
                        return;
                    }
                }
            }
        };

        // Chat-typed text is taken verbatim; everything else (voice and
        // keyboard input, transcribed chat voice notes) goes through the
        // hallucination filter.
        let text = if source == Source::Chat && !was_audio {
            text
        } else {
            self.collab.transcriber.filter_transcript(&text)
        };

        if text.trim().is_empty() {
            tracing::debug!(source = source.name(), "empty transcript, dropping");
            self.collab.status.set_phase(Phase::Listening);
            return;
        }

        self.collab.status.set_transcription(&text);
        tracing::info!(source = source.name(), transcript = %text, "processing turn");

        // Echo the transcript of a chat voice note back into the room
        if source == Source::Chat && was_audio {
            self.send_chat(room.as_deref(), &format!("> Transkript: {text}"));
        }

        match self.keywords.intercept(&text, source) {
            Some(KeywordAction::Cancel) => {
                // Chat cancels additionally reach into the backend; a voice
                // cancel mid-turn goes through the producer side-channel
                // instead, so here there is normally nothing outstanding.
                if source == Source::Chat {
                    self.collab.agent.cancel().await;
                }
                self.send_notice(source, room.as_deref(), NOTICE_CANCELLED).await;
                self.collab.status.set_phase(Phase::Listening);
                return;
            }
            Some(KeywordAction::Reset) => {
                self.collab.agent.reset().await;
                self.send_notice(source, room.as_deref(), NOTICE_RESET).await;
                self.collab.status.set_phase(Phase::Listening);
                return;
            }
            Some(KeywordAction::Restart) => {
                tracing::info!(source = source.name(), "restart requested");
                self.restart.cancel();
                self.collab.status.set_phase(Phase::Listening);
                return;
            }
            None => {}
        }

        let request = if source == Source::Chat {
            format!("{CHAT_MESSAGE_PREFIX}{text}")
        } else {
            text
        };

        if source == Source::Voice {
            self.signals.set_voice_ask(true);
        }
        let result = self.collab.agent.ask(&request).await;
        if source == Source::Voice {
            self.signals.set_voice_ask(false);
        }

        match result {
            Ok(response) => self.route_response(source, room.as_deref(), &response).await,
            Err(e) if e.is_cancelled() => {
                // The cancelling side already acknowledged; skip normal
                // response handling for the interrupted turn.
                tracing::info!(source = source.name(), "turn cancelled");
            }
            Err(e) => {
                tracing::error!(error = %e, source = source.name(), "agent call failed");
                let notice = if e.is_timeout() {
                    NOTICE_AGENT_TIMEOUT
                } else {
                    NOTICE_AGENT_ERROR
                };
                self.notify_error(source, room.as_deref(), notice).await;
            }
        }

        self.collab.status.set_phase(Phase::Listening);
    }

    /// Route a completed turn to its channel output
    async fn route_response(&self, source: Source, room: Option<&str>, response: &str) {
        self.collab.status.set_response(response);

        match source {
            Source::Voice => {
                self.collab.status.set_phase(Phase::Speaking);
                if let Err(e) = self.collab.voice.speak(response).await {
                    tracing::error!(error = %e, "speech synthesis failed");
                    self.collab.voice.play_cue(Cue::Error).await;
                }
                self.collab.voice.play_cue(Cue::Ready).await;
            }
            Source::Keyboard => {
                self.collab.status.print_response(response);
            }
            Source::Chat => {
                self.send_chat(room, response);
            }
        }
    }

    /// Deliver a short acknowledgement on the envelope's channel
    async fn send_notice(&self, source: Source, room: Option<&str>, text: &str) {
        match source {
            Source::Voice => {
                if let Err(e) = self.collab.voice.speak(text).await {
                    tracing::error!(error = %e, "failed to speak notice");
                    self.collab.voice.play_cue(Cue::Error).await;
                }
            }
            Source::Keyboard => self.collab.status.print_notice(text),
            Source::Chat => self.send_chat(room, text),
        }
    }

    /// Deliver an error notice; the fallback tone path never raises
    async fn notify_error(&self, source: Source, room: Option<&str>, text: &str) {
        self.collab.status.set_phase(Phase::Error);
        self.send_notice(source, room, text).await;
    }

    fn send_chat(&self, room: Option<&str>, text: &str) {
        let Some(room) = room else {
            tracing::warn!("chat envelope without room reference, dropping reply");
            return;
        };

        if self
            .collab
            .chat_outbox
            .send(ChatReply {
                room_id: room.to_string(),
                text: text.to_string(),
            })
            .is_err()
        {
            tracing::warn!(room, "chat bridge gone, dropping reply");
        }
    }
}
