use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jarvis_gateway::agent::{ClaudeBackend, ConversationalAgent};
use jarvis_gateway::input::KeyboardProducer;
use jarvis_gateway::voice::{
    self, AudioInput, SilentOutput, Speaker, TextToSpeech, Transcriber, VoiceOutput,
    VoiceProducer, WhisperTranscriber,
};
use jarvis_gateway::worker::{Collaborators, Worker};
use jarvis_gateway::{Config, KeywordSet, MatrixBridge, StatusBoard};

/// Exit code asking the supervisor to relaunch the process
const RESTART_EXIT_CODE: u8 = 75;

/// Jarvis - wake-word voice assistant with a Claude Code backend
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Path to config.yaml (default: ~/.config/jarvis/config.yaml)
    #[arg(short, long, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice input/output (keyboard and chat only)
    #[arg(long, env = "JARVIS_DISABLE_VOICE")]
    no_voice: bool,

    /// Disable the Matrix chat bridge
    #[arg(long)]
    no_chat: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hallo! Dies ist ein Test der Sprachausgabe.")]
        text: String,
    },
}

/// How a gateway run ended
enum Outcome {
    /// Normal shutdown
    Completed,
    /// A restart keyword fired; the supervisor should relaunch us
    RestartRequested,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_gateway=info",
        1 => "info,jarvis_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::RestartRequested) => {
            tracing::info!("exiting for supervisor restart");
            ExitCode::from(RESTART_EXIT_CODE)
        }
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Outcome> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await?,
            Command::TestSpeaker => test_speaker().await?,
            Command::TestTts { text } => test_tts(&config, &text).await?,
        }
        return Ok(Outcome::Completed);
    }

    run_gateway(config, &cli).await
}

#[allow(clippy::too_many_lines)]
async fn run_gateway(config: Config, cli: &Cli) -> anyhow::Result<Outcome> {
    let voice_enabled = !cli.no_voice;
    let chat_enabled = config.matrix.enabled && !cli.no_chat;

    tracing::info!(
        voice = voice_enabled,
        chat = chat_enabled,
        working_directory = %config.ai.working_directory.display(),
        "starting jarvis gateway"
    );

    let status = Arc::new(StatusBoard::new());
    let stop = CancellationToken::new();
    let restart = CancellationToken::new();

    let openai_key = config.api_keys.openai.clone().unwrap_or_default();

    let transcriber: Arc<dyn Transcriber> =
        Arc::new(WhisperTranscriber::new(&config.stt, openai_key.clone())?);

    let voice_out: Arc<dyn VoiceOutput> = if voice_enabled {
        let tts = TextToSpeech::new(&config.tts, openai_key)?;
        let output = voice::create_audio_output()?;
        Arc::new(Speaker::new(tts, output, config.audio.sounds_dir.as_deref()))
    } else {
        Arc::new(SilentOutput)
    };

    let agent: Arc<dyn ConversationalAgent> = Arc::new(ClaudeBackend::new(config.ai.clone())?);

    let keywords = KeywordSet::new(
        config.keywords.cancel.clone(),
        config.keywords.reset.clone(),
        config.keywords.restart.clone(),
    );

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let collab = Collaborators {
        agent: Arc::clone(&agent),
        transcriber: Arc::clone(&transcriber),
        voice: Arc::clone(&voice_out),
        chat_outbox: outbox_tx,
        status: Arc::clone(&status),
    };

    let (worker, queue, signals) = Worker::new(
        collab,
        keywords.clone(),
        config.audio.min_command_sec,
        stop.clone(),
        restart.clone(),
    );
    let worker_task = tokio::spawn(worker.run());

    if voice_enabled {
        let producer = VoiceProducer {
            audio: config.audio.clone(),
            wake_word: config.wake_word.clone(),
            keywords,
            queue: queue.clone(),
            signals,
            agent,
            transcriber,
            voice: Arc::clone(&voice_out),
            status: Arc::clone(&status),
            stop: stop.clone(),
            runtime: tokio::runtime::Handle::current(),
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = producer.run() {
                tracing::error!(error = %e, "voice producer died");
            }
        });
    }

    {
        let keyboard = KeyboardProducer {
            queue: queue.clone(),
            status: Arc::clone(&status),
            stop: stop.clone(),
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = keyboard.run() {
                tracing::error!(error = %e, "keyboard producer died");
            }
        });
    }

    if chat_enabled {
        let bridge = MatrixBridge::new(&config.matrix, queue.clone(), stop.clone());
        tokio::spawn(async move {
            if let Err(e) = bridge.run(outbox_rx).await {
                tracing::error!(error = %e, "matrix bridge died");
            }
        });
    } else {
        drop(outbox_rx);
    }

    tracing::info!("jarvis gateway ready");

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            Outcome::Completed
        }
        () = stop.cancelled() => Outcome::Completed,
        () = restart.cancelled() => Outcome::RestartRequested,
    };

    // Cooperative shutdown: producers stop enqueueing, the worker drains
    // what is left (bounded by one full agent call), then exits.
    stop.cancel();
    let drain_timeout = Duration::from_secs(config.ai.timeout_sec + 5);
    if tokio::time::timeout(drain_timeout, queue.wait_idle()).await.is_err() {
        tracing::warn!("queue drain timed out, exiting anyway");
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), worker_task).await;

    tracing::info!("jarvis gateway stopped");
    Ok(outcome)
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let audio = config.audio.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut mic = voice::create_audio_input(&audio)?;
        let sample_rate = mic.sample_rate();
        println!("Sample rate: {sample_rate} Hz");
        println!("---");

        let chunks_per_second = (sample_rate as usize).div_ceil(audio.chunk_size);

        for i in 0..duration {
            let mut samples: Vec<i16> = Vec::new();
            for _ in 0..chunks_per_second {
                samples.extend(mic.read_chunk()?);
            }

            let energy = calculate_rms(&samples);
            let peak = samples
                .iter()
                .map(|s| f32::from(*s).abs() / 32768.0)
                .fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
        }

        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate normalized RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let f = f32::from(s) / 32768.0;
            f * f
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = voice::create_audio_output()?;

    let sample_rate = 24000u32;
    let frequency = 440.0f32;
    let duration_secs = 2.0f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            (value * 32767.0) as i16
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    tokio::task::spawn_blocking(move || output.play_pcm(&samples, sample_rate)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let api_key = config.api_keys.openai.clone().unwrap_or_default();
    let tts = TextToSpeech::new(&config.tts, api_key)?;
    let output = voice::create_audio_output()?;

    println!("Synthesizing speech...");
    let speaker = Speaker::new(tts, output, config.audio.sounds_dir.as_deref());
    speaker.speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
