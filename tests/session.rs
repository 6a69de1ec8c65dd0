mod common;

use std::time::Duration;

use common::{FakeEndpoint, WAIT, appended_samples, tone};
use realtime_voice_rs::audio::FlushSignal;
use realtime_voice_rs::error::{SessionError, TransportError};
use realtime_voice_rs::{RealtimeSession, SessionConfig, SessionEvent, SessionState};
use serde_json::json;
use tokio::sync::mpsc;

async fn open_session(
    endpoint: &FakeEndpoint,
) -> (RealtimeSession, mpsc::UnboundedReceiver<SessionEvent>, FlushSignal) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let interrupt = FlushSignal::new();
    let mut config = SessionConfig::new(endpoint.url.clone());
    config.token = Some("sk-test".to_string());
    let mut session = RealtimeSession::new(config, tx, interrupt.clone());
    session.start().await.unwrap();
    assert_eq!(session.state(), SessionState::Open);
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened));
    (session, rx, interrupt)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn announces_session_with_server_vad() {
    let mut endpoint = FakeEndpoint::spawn().await;
    let (_session, _rx, _) = open_session(&endpoint).await;

    let first = endpoint.next_message().await;
    assert_eq!(first["type"], "session.update");
    assert_eq!(first["session"]["turn_detection"]["type"], "server_vad");
    assert_eq!(first["session"]["input_audio_format"], "pcm16");
    assert_eq!(endpoint.authorization().as_deref(), Some("Bearer sk-test"));
}

#[tokio::test]
async fn audio_and_clear_reach_the_endpoint_in_order() {
    let mut endpoint = FakeEndpoint::spawn().await;
    let (session, _rx, _) = open_session(&endpoint).await;

    for v in 1..=3 {
        assert!(session.send_audio(&tone(v, 480)));
    }
    assert!(session.clear_pending_input_audio());

    for v in 1..=3 {
        let msg = endpoint.next_of_type("input_audio_buffer.append").await;
        assert_eq!(appended_samples(&msg), vec![v; 480]);
    }
    let clear = endpoint.next_message().await;
    assert_eq!(clear["type"], "input_audio_buffer.clear");
    assert!(clear["event_id"].as_str().unwrap().starts_with("evt_"));
}

#[tokio::test]
async fn malformed_messages_are_reported_and_skipped() {
    let endpoint = FakeEndpoint::spawn().await;
    let (session, mut rx, _) = open_session(&endpoint).await;

    endpoint.send_raw("{not json");
    endpoint.send(json!({"type": "response.audio.delta", "delta": "%%%"}));
    endpoint.send(json!({"type": "rate_limits.updated", "rate_limits": []}));
    endpoint.send_delta(&tone(5, 24));

    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Error(SessionError::Protocol(_))
    ));
    // undecodable audio is only noticed by whoever decodes it
    let SessionEvent::AudioDelta { chunk, .. } = next_event(&mut rx).await else {
        panic!("expected audio delta");
    };
    assert!(chunk.decode().is_err());
    let SessionEvent::AudioDelta { chunk, .. } = next_event(&mut rx).await else {
        panic!("expected audio delta");
    };
    assert_eq!(chunk.decode().unwrap().samples(), &[5; 24][..]);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn remote_error_keeps_session_open() {
    let endpoint = FakeEndpoint::spawn().await;
    let (session, mut rx, _) = open_session(&endpoint).await;

    endpoint.send(json!({
        "type": "error",
        "error": {"type": "invalid_request_error", "code": "bad_audio", "message": "too short"}
    }));
    let SessionEvent::Error(SessionError::Application(err)) = next_event(&mut rx).await else {
        panic!("expected application error");
    };
    assert_eq!(err.code.as_deref(), Some("bad_audio"));
    assert_eq!(err.message, "too short");
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn speech_started_advances_the_interrupt_before_later_deltas() {
    let endpoint = FakeEndpoint::spawn().await;
    let (_session, mut rx, interrupt) = open_session(&endpoint).await;

    endpoint.send_delta(&tone(1, 48));
    endpoint.send_speech_started();
    endpoint.send_delta(&tone(2, 48));

    let SessionEvent::AudioDelta { epoch: before, .. } = next_event(&mut rx).await else {
        panic!("expected audio delta");
    };
    let SessionEvent::InputSpeechStarted { epoch: interrupted } = next_event(&mut rx).await else {
        panic!("expected speech start");
    };
    let SessionEvent::AudioDelta { epoch: after, .. } = next_event(&mut rx).await else {
        panic!("expected audio delta");
    };
    assert!(interrupt.is_stale(before));
    assert!(!interrupt.is_stale(after));
    assert_eq!(after, interrupted);
    assert_eq!(interrupt.current(), interrupted);
}

#[tokio::test]
async fn transcripts_are_forwarded() {
    let endpoint = FakeEndpoint::spawn().await;
    let (_session, mut rx, _) = open_session(&endpoint).await;

    endpoint.send(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "what's the weather"
    }));
    endpoint.send(json!({"type": "response.audio_transcript.delta", "delta": "Sunny"}));
    endpoint.send(json!({"type": "response.done", "response": {}}));

    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::UserTranscript(t) if t == "what's the weather"
    ));
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::AssistantTranscript(t) if t == "Sunny"
    ));
    assert!(matches!(next_event(&mut rx).await, SessionEvent::ResponseDone));
}

#[tokio::test]
async fn dropped_transport_is_reported_once() {
    let endpoint = FakeEndpoint::spawn().await;
    let (session, mut rx, _) = open_session(&endpoint).await;

    endpoint.drop_connection();
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::TransportError(TransportError::Dropped(_))
    ));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.send_audio(&tone(1, 480)));

    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(!matches!(extra, Ok(Some(_))));
}

#[tokio::test]
async fn remote_close_is_orderly() {
    let endpoint = FakeEndpoint::spawn().await;
    let (session, mut rx, _) = open_session(&endpoint).await;

    endpoint.close();
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::TransportClosed
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn session_is_not_reusable() {
    let mut endpoint = FakeEndpoint::spawn().await;
    let (mut session, _rx, _) = open_session(&endpoint).await;

    assert!(matches!(
        session.start().await,
        Err(TransportError::NotReusable(SessionState::Open))
    ));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.start().await,
        Err(TransportError::NotReusable(SessionState::Closed))
    ));

    // nothing reaches the transport after close
    assert!(!session.send_audio(&tone(1, 480)));
    assert!(!session.clear_pending_input_audio());
    let _ = endpoint.next_of_type("session.update").await;
    endpoint.assert_quiet(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn busy_inbound_stream_does_not_starve_writes_or_close() {
    let mut endpoint = FakeEndpoint::spawn().await;
    let (mut session, mut rx, _) = open_session(&endpoint).await;
    let _ = endpoint.next_of_type("session.update").await;

    // nobody drains events while the remote floods the link
    for _ in 0..2000 {
        endpoint.send_delta(&tone(1, 24));
    }
    assert!(session.send_audio(&tone(2, 480)));
    let msg = endpoint.next_of_type("input_audio_buffer.append").await;
    assert_eq!(appended_samples(&msg), vec![2; 480]);

    tokio::time::timeout(WAIT, session.stop())
        .await
        .expect("close did not get through");
    assert_eq!(session.state(), SessionState::Closed);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(last, Some(SessionEvent::TransportClosed)));
}
