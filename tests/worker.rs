//! Turn worker integration tests
//!
//! Drive the worker through fake collaborators: FIFO ordering, single-flight
//! agent usage, keyword interception, routing and the error paths.

use std::sync::atomic::Ordering;
use std::time::Duration;

use jarvis_gateway::message::{AudioClip, Envelope, Source};
use jarvis_gateway::voice::Cue;
use jarvis_gateway::worker::{
    NOTICE_AGENT_ERROR, NOTICE_AGENT_TIMEOUT, NOTICE_CANCELLED, NOTICE_RESET, NOTICE_STT_ERROR,
};

mod common;
use common::{FakeAgent, FakeOutcome, FakeTranscriber, spawn_gateway};

/// One second of silence at 16kHz, int16 mono
fn pcm_secs(secs: f32) -> Vec<u8> {
    let samples = (16000.0 * secs) as usize;
    vec![0u8; samples * 2]
}

#[tokio::test]
async fn fifo_ordering_across_sources() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    gw.queue.enqueue(Envelope::keyboard_text("erstens".to_string()));
    gw.queue.enqueue(Envelope::chat_text(
        "zweitens".to_string(),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.queue.enqueue(Envelope::keyboard_text("drittens".to_string()));
    gw.queue.enqueue(Envelope::keyboard_text("viertens".to_string()));

    gw.drain().await;

    let asks = gw.agent.asks();
    assert_eq!(asks.len(), 4);
    assert_eq!(asks[0], "erstens");
    assert!(asks[1].ends_with("zweitens"));
    assert_eq!(asks[2], "drittens");
    assert_eq!(asks[3], "viertens");
}

#[tokio::test]
async fn agent_calls_are_single_flight() {
    let gw = spawn_gateway(
        FakeAgent::with_delay(Duration::from_millis(30)),
        FakeTranscriber::returning(""),
        0.5,
    );

    for i in 0..5 {
        gw.queue.enqueue(Envelope::keyboard_text(format!("auftrag {i}")));
    }

    gw.drain().await;

    assert_eq!(gw.agent.asks().len(), 5);
    assert!(
        !gw.agent.reentrant_ask.load(Ordering::SeqCst),
        "a second ask was issued while one was outstanding"
    );
}

#[tokio::test]
async fn cancel_keyword_beats_reset_keyword() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    // Contains both a cancel and a reset phrase
    gw.queue.enqueue(Envelope::keyboard_text(
        "stopp, und danach ein neues gespräch".to_string(),
    ));

    gw.drain().await;

    assert!(gw.agent.asks().is_empty(), "AI must not be called");
    assert_eq!(gw.agent.resets.load(Ordering::SeqCst), 0, "reset must not fire");
}

#[tokio::test]
async fn voice_cancel_keyword_is_acknowledged_spoken() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning("abbrechen"), 0.5);

    gw.queue
        .enqueue(Envelope::voice_audio(pcm_secs(1.0), 16000));
    gw.drain().await;

    assert!(gw.agent.asks().is_empty());
    // A plain voice cancel has nothing outstanding; backend cancel stays untouched
    assert_eq!(gw.agent.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(gw.voice.spoken(), vec![NOTICE_CANCELLED.to_string()]);
}

#[tokio::test]
async fn chat_cancel_also_reaches_the_backend() {
    let mut gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    gw.queue.enqueue(Envelope::chat_text(
        "bitte abbrechen".to_string(),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.drain().await;

    assert!(gw.agent.asks().is_empty());
    assert_eq!(gw.agent.cancels.load(Ordering::SeqCst), 1);

    let reply = gw.outbox.recv().await.unwrap();
    assert_eq!(reply.room_id, "!room:example.org");
    assert_eq!(reply.text, NOTICE_CANCELLED);
}

#[tokio::test]
async fn reset_keyword_resets_backend_and_acknowledges() {
    let mut gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    gw.queue
        .enqueue(Envelope::keyboard_text("neues gespräch bitte".to_string()));
    gw.queue.enqueue(Envelope::chat_text(
        "reset".to_string(),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.drain().await;

    assert!(gw.agent.asks().is_empty());
    assert_eq!(gw.agent.resets.load(Ordering::SeqCst), 2);

    let reply = gw.outbox.recv().await.unwrap();
    assert_eq!(reply.text, NOTICE_RESET);
}

#[tokio::test]
async fn restart_keyword_fires_signal_for_keyboard_but_not_chat() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    // Chat: forwarded to the AI as ordinary text
    gw.queue.enqueue(Envelope::chat_text(
        "neustart".to_string(),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.drain().await;

    assert_eq!(gw.agent.asks().len(), 1);
    assert!(gw.agent.asks()[0].contains("neustart"));
    assert!(!gw.restart.is_cancelled());

    // Keyboard: triggers the restart signal, never reaches the AI
    gw.queue.enqueue(Envelope::keyboard_text("neustart".to_string()));
    gw.drain().await;

    assert_eq!(gw.agent.asks().len(), 1, "restart text must not reach the AI");
    assert!(gw.restart.is_cancelled());
}

#[tokio::test]
async fn short_audio_is_dropped_before_transcription() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning("egal"), 0.5);

    gw.queue
        .enqueue(Envelope::voice_audio(pcm_secs(0.2), 16000));
    gw.drain().await;

    assert_eq!(gw.transcriber.calls(), 0, "transcriber must not see short captures");
    assert!(gw.agent.asks().is_empty());
    assert!(gw.voice.spoken().is_empty());
}

#[tokio::test]
async fn empty_transcript_is_dropped_silently() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning("   "), 0.5);

    gw.queue
        .enqueue(Envelope::voice_audio(pcm_secs(1.0), 16000));
    gw.drain().await;

    assert_eq!(gw.transcriber.calls(), 1);
    assert!(gw.agent.asks().is_empty());
    assert!(gw.voice.spoken().is_empty());
}

#[tokio::test]
async fn end_to_end_voice_turn() {
    let gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Ok("Erledigt.".to_string())]),
        FakeTranscriber::returning(""),
        0.5,
    );

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("Schreibe eine Notiz".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.drain().await;

    assert_eq!(gw.agent.asks(), vec!["Schreibe eine Notiz".to_string()]);
    assert_eq!(gw.voice.spoken(), vec!["Erledigt.".to_string()]);
    assert_eq!(gw.voice.cues(), vec![Cue::Ready]);
    assert_eq!(gw.status.response(), "Erledigt.");
}

#[tokio::test]
async fn chat_turn_is_prefixed_and_replied_in_room() {
    let mut gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Ok("**Gern!**".to_string())]),
        FakeTranscriber::returning(""),
        0.5,
    );

    gw.queue.enqueue(Envelope::chat_text(
        "Was steht heute an?".to_string(),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.drain().await;

    let asks = gw.agent.asks();
    assert_eq!(asks.len(), 1);
    assert!(asks[0].starts_with("[Chat-Nachricht"));
    assert!(asks[0].ends_with("Was steht heute an?"));

    let reply = gw.outbox.recv().await.unwrap();
    assert_eq!(reply.room_id, "!room:example.org");
    assert_eq!(reply.text, "**Gern!**");
    assert!(gw.voice.spoken().is_empty(), "chat never touches audio");
}

#[tokio::test]
async fn chat_voice_note_gets_transcript_quote() {
    let mut gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Ok("Notiert.".to_string())]),
        FakeTranscriber::returning("Einkaufsliste bitte"),
        0.5,
    );

    gw.queue.enqueue(Envelope::chat_audio(
        AudioClip::file(vec![0u8; 2048], "note.ogg".to_string()),
        "!room:example.org".to_string(),
        "@user:example.org".to_string(),
    ));
    gw.drain().await;

    let quote = gw.outbox.recv().await.unwrap();
    assert_eq!(quote.text, "> Transkript: Einkaufsliste bitte");

    let reply = gw.outbox.recv().await.unwrap();
    assert_eq!(reply.text, "Notiert.");
}

#[tokio::test]
async fn transcription_failure_routes_channel_notice() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::failing(), 0.5);

    gw.queue
        .enqueue(Envelope::voice_audio(pcm_secs(1.0), 16000));
    gw.drain().await;

    assert!(gw.agent.asks().is_empty(), "failed STT must stop the turn");
    assert_eq!(gw.voice.spoken(), vec![NOTICE_STT_ERROR.to_string()]);
}

#[tokio::test]
async fn agent_timeout_gets_timeout_specific_notice() {
    let gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Timeout]),
        FakeTranscriber::returning(""),
        0.5,
    );

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("lange Aufgabe".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.drain().await;

    assert_eq!(gw.voice.spoken(), vec![NOTICE_AGENT_TIMEOUT.to_string()]);
}

#[tokio::test]
async fn agent_failure_gets_general_notice_and_worker_survives() {
    let gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![
            FakeOutcome::Exit,
            FakeOutcome::Ok("geht wieder".to_string()),
        ]),
        FakeTranscriber::returning(""),
        0.5,
    );

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("kaputt".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("nochmal".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.drain().await;

    // First turn failed with a notice, second turn completed normally
    assert_eq!(
        gw.voice.spoken(),
        vec![NOTICE_AGENT_ERROR.to_string(), "geht wieder".to_string()]
    );
}

#[tokio::test]
async fn cancelled_turn_skips_response_handling() {
    let gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Cancelled]),
        FakeTranscriber::returning(""),
        0.5,
    );

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("abgebrochener Auftrag".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.drain().await;

    // No response, no error notice; the cancelling side acknowledged already
    assert!(gw.voice.spoken().is_empty());
    assert!(gw.voice.cues().is_empty());
}

#[tokio::test]
async fn synthesis_failure_falls_back_to_error_tone() {
    let gw = spawn_gateway(
        FakeAgent::with_outcomes(vec![FakeOutcome::Ok("Antwort".to_string())]),
        FakeTranscriber::returning(""),
        0.5,
    );
    gw.voice.fail_speak.store(true, Ordering::SeqCst);

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("sag was".to_string()),
        channel_ref: None,
        sender_ref: None,
    });
    gw.drain().await;

    assert_eq!(gw.voice.cues(), vec![Cue::Error, Cue::Ready]);
}

#[tokio::test]
async fn voice_ask_arms_the_cancellation_side_channel() {
    let gw = spawn_gateway(
        FakeAgent::with_delay(Duration::from_millis(300)),
        FakeTranscriber::returning(""),
        0.5,
    );

    assert!(!gw.signals.voice_ask_active());

    gw.queue.enqueue(Envelope {
        source: Source::Voice,
        payload: jarvis_gateway::Payload::Text("lange Frage".to_string()),
        channel_ref: None,
        sender_ref: None,
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        gw.signals.voice_ask_active(),
        "the side channel must be armed while a voice ask is outstanding"
    );

    gw.drain().await;
    assert!(!gw.signals.voice_ask_active());
}

#[tokio::test]
async fn worker_drains_queue_before_observing_stop() {
    let gw = spawn_gateway(FakeAgent::default(), FakeTranscriber::returning(""), 0.5);

    for i in 0..3 {
        gw.queue.enqueue(Envelope::keyboard_text(format!("auftrag {i}")));
    }
    gw.stop.cancel();
    gw.drain().await;

    assert_eq!(gw.agent.asks().len(), 3, "queued turns must not be discarded");
}
