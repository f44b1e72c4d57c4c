//! Shared test utilities
//!
//! Fake collaborators implementing the worker's traits, plus a harness that
//! spawns a worker wired to them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jarvis_gateway::agent::ConversationalAgent;
use jarvis_gateway::channels::ChatReply;
use jarvis_gateway::keywords::KeywordSet;
use jarvis_gateway::message::AudioClip;
use jarvis_gateway::ui::StatusBoard;
use jarvis_gateway::voice::{Cue, Transcriber, VoiceOutput};
use jarvis_gateway::worker::{Collaborators, QueueHandle, TurnSignals, Worker};
use jarvis_gateway::{Error, Result};

/// Scripted outcome for one fake agent call
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Ok(String),
    Timeout,
    Exit,
    Cancelled,
}

/// Fake AI backend recording every interaction
#[derive(Default)]
pub struct FakeAgent {
    pub asks: Mutex<Vec<String>>,
    pub outcomes: Mutex<VecDeque<FakeOutcome>>,
    pub delay: Option<Duration>,
    in_flight: AtomicBool,
    pub reentrant_ask: AtomicBool,
    pub cancels: AtomicUsize,
    pub resets: AtomicUsize,
}

impl FakeAgent {
    pub fn with_outcomes(outcomes: Vec<FakeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn asks(&self) -> Vec<String> {
        self.asks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationalAgent for FakeAgent {
    async fn ask(&self, text: &str) -> Result<String> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.reentrant_ask.store(true, Ordering::SeqCst);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.asks.lock().unwrap().push(text.to_string());

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FakeOutcome::Ok(format!("echo: {text}")));

        self.in_flight.store(false, Ordering::SeqCst);

        match outcome {
            FakeOutcome::Ok(response) => Ok(response),
            FakeOutcome::Timeout => Err(Error::AgentTimeout { secs: 1 }),
            FakeOutcome::Exit => Err(Error::AgentExit {
                code: 1,
                stderr: "fake failure".to_string(),
            }),
            FakeOutcome::Cancelled => Err(Error::AgentCancelled),
        }
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake transcriber returning a fixed transcript
pub struct FakeTranscriber {
    pub transcript: String,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn returning(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            transcript: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::Stt("fake transcription failure".to_string()))
        } else {
            Ok(self.transcript.clone())
        }
    }

    fn filter_transcript(&self, text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Fake voice output recording spoken texts and cues
#[derive(Default)]
pub struct FakeVoice {
    pub spoken: Mutex<Vec<String>>,
    pub cues: Mutex<Vec<Cue>>,
    pub fail_speak: AtomicBool,
}

impl FakeVoice {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceOutput for FakeVoice {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.fail_speak.load(Ordering::SeqCst) {
            return Err(Error::Tts("fake synthesis failure".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn play_cue(&self, cue: Cue) {
        self.cues.lock().unwrap().push(cue);
    }
}

/// A worker wired to fakes, running on its own task
pub struct TestGateway {
    pub queue: QueueHandle,
    pub agent: Arc<FakeAgent>,
    pub transcriber: Arc<FakeTranscriber>,
    pub voice: Arc<FakeVoice>,
    pub outbox: mpsc::UnboundedReceiver<ChatReply>,
    pub status: Arc<StatusBoard>,
    pub signals: Arc<TurnSignals>,
    pub stop: CancellationToken,
    pub restart: CancellationToken,
}

impl TestGateway {
    /// Enqueue-drain helper: wait until everything enqueued so far is done
    pub async fn drain(&self) {
        self.queue.wait_idle().await;
    }
}

/// German keyword lists used across the tests
pub fn test_keywords() -> KeywordSet {
    KeywordSet::new(
        vec!["stopp".to_string(), "abbrechen".to_string()],
        vec!["neues gespräch".to_string(), "reset".to_string()],
        vec!["neustart".to_string()],
    )
}

/// Spawn a worker with the given fakes
pub fn spawn_gateway(
    agent: FakeAgent,
    transcriber: FakeTranscriber,
    min_command_sec: f32,
) -> TestGateway {
    let agent = Arc::new(agent);
    let transcriber = Arc::new(transcriber);
    let voice = Arc::new(FakeVoice::default());
    let status = Arc::new(StatusBoard::new());
    let stop = CancellationToken::new();
    let restart = CancellationToken::new();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let collab = Collaborators {
        agent: Arc::clone(&agent) as Arc<dyn ConversationalAgent>,
        transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
        voice: Arc::clone(&voice) as Arc<dyn VoiceOutput>,
        chat_outbox: outbox_tx,
        status: Arc::clone(&status),
    };

    let (worker, queue, signals) = Worker::new(
        collab,
        test_keywords(),
        min_command_sec,
        stop.clone(),
        restart.clone(),
    );
    tokio::spawn(worker.run());

    TestGateway {
        queue,
        agent,
        transcriber,
        voice,
        outbox: outbox_rx,
        status,
        signals,
        stop,
        restart,
    }
}
