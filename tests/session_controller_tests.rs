mod common;

use std::time::Duration;

use common::{harness, harness_with, relay_config, ConnectBehavior, FakeMic};
use parley::audio::CaptureStatus;
use parley::config::TurnDetection;
use parley::error::ParleyError;
use parley::realtime::{EventSource, ItemDelta, ItemRole, ItemStatus, ServerEvent};
use parley::session::{ConnectionState, SessionUpdate};
use parley::util::with_timeout;
use pretty_assertions::assert_eq;
use serde_json::json;

fn summary(records: &[parley::realtime::RealtimeEventRecord]) -> Vec<(EventSource, String, u32)> {
    records
        .iter()
        .map(|record| (record.source, record.event_type.clone(), record.count))
        .collect()
}

#[tokio::test]
async fn connect_configures_session_greets_and_starts_streaming() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");

    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert!(h.session.is_connected());
    assert_eq!(h.session.turn_detection(), TurnDetection::ServerVad);
    assert_eq!(h.session.capture_status(), CaptureStatus::Recording);
    assert!(h.mic.state().streaming);
    assert!(h.speaker.state().open);

    assert_eq!(
        h.transport.sent_types(),
        vec!["session.update", "conversation.item.create", "response.create"]
    );
    let sent = h.transport.sent();
    assert_eq!(sent[0]["session"]["turn_detection"]["type"], "server_vad");
    assert_eq!(
        sent[0]["session"]["input_audio_transcription"]["model"],
        "whisper-1"
    );
    assert_eq!(sent[1]["item"]["role"], "user");
    assert_eq!(sent[1]["item"]["content"][0]["type"], "input_text");
    assert_eq!(sent[1]["item"]["content"][0]["text"], "Hello!");

    assert_eq!(
        summary(h.session.events()),
        vec![
            (EventSource::Client, "session.update".to_string(), 1),
            (EventSource::Client, "conversation.item.create".to_string(), 1),
            (EventSource::Client, "response.create".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn connect_without_greeting_sends_only_the_session_update() {
    let mut config = relay_config();
    config.greeting = None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("connect should succeed");
    assert_eq!(h.transport.sent_types(), vec!["session.update"]);
}

#[tokio::test]
async fn manual_turn_detection_leaves_capture_paused() {
    let mut config = relay_config();
    config.turn_detection = TurnDetection::None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("connect should succeed");

    assert_eq!(h.session.turn_detection(), TurnDetection::None);
    assert_eq!(h.session.capture_status(), CaptureStatus::Paused);
    assert!(h.transport.sent()[0]["session"]["turn_detection"].is_null());
}

#[tokio::test]
async fn second_connect_is_rejected_without_side_effects() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    let sent_before = h.transport.sent().len();

    let error = h.session.connect().await.expect_err("second connect should fail");
    assert!(matches!(error, ParleyError::AlreadyConnected));
    assert!(error.is_connect_precondition());
    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert_eq!(h.transport.sent().len(), sent_before);
    assert_eq!(h.transport.state().connects, 1);
}

#[tokio::test]
async fn remote_failure_releases_everything_and_reports_the_cause() {
    let mut h = harness(ConnectBehavior::Reject);
    let error = h.session.connect().await.expect_err("connect should fail");

    assert!(matches!(error, ParleyError::RemoteConnectionFailed(_)));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.session.capture_status(), CaptureStatus::Idle);
    assert!(!h.mic.state().acquired);
    assert_eq!(h.mic.state().releases, 1);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn missing_microphone_fails_before_touching_the_network() {
    let mut h = harness_with(relay_config(), ConnectBehavior::Accept, FakeMic::unavailable());
    let error = h.session.connect().await.expect_err("connect should fail");

    assert!(matches!(error, ParleyError::DeviceUnavailable(_)));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.transport.state().connects, 0);
}

#[tokio::test]
async fn a_timed_out_connect_stays_connecting_until_disconnect() {
    let mut h = harness(ConnectBehavior::Hang);
    let error = with_timeout(Duration::from_millis(50), h.session.connect())
        .await
        .expect_err("connect should time out");
    assert!(matches!(error, ParleyError::Timeout(50)));
    assert_eq!(h.session.state(), ConnectionState::Connecting);

    let error = h.session.connect().await.expect_err("connect should be rejected");
    assert!(matches!(error, ParleyError::AlreadyConnecting));

    h.session.disconnect().await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert!(!h.mic.state().acquired);
}

#[tokio::test]
async fn disconnect_never_fails_from_any_state() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.disconnect().await;
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.session.connect().await.expect("connect should succeed");
    h.session.disconnect().await;
    h.session.disconnect().await;

    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.session.capture_status(), CaptureStatus::Idle);
    assert!(!h.transport.state().connected);
    assert!(h.speaker.state().flushes >= 1);
}

#[tokio::test]
async fn session_can_reconnect_after_disconnect() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("first connect should succeed");
    h.session.disconnect().await;
    h.session.connect().await.expect("second connect should succeed");

    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert_eq!(h.session.capture_status(), CaptureStatus::Recording);
    assert_eq!(h.mic.state().acquires, 2);
}

#[tokio::test]
async fn captured_frames_are_streamed_in_capture_order() {
    let mut config = relay_config();
    config.greeting = None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("connect should succeed");

    h.mic.speak(&[1, 2]);
    h.mic.speak(&[3, 4]);
    assert!(h.session.process_next().await.expect("first frame"));
    assert!(h.session.process_next().await.expect("second frame"));

    let sent = h.transport.sent();
    assert_eq!(
        h.transport.sent_types(),
        vec![
            "session.update",
            "input_audio_buffer.append",
            "input_audio_buffer.append"
        ]
    );
    // [1, 2] and [3, 4] as little-endian PCM16.
    assert_eq!(sent[1]["audio"], "AQACAA==");
    assert_eq!(sent[2]["audio"], "AwAEAA==");
    assert_eq!(
        summary(h.session.events()).last(),
        Some(&(
            EventSource::Client,
            "input_audio_buffer.append".to_string(),
            2
        ))
    );
}

#[tokio::test]
async fn assistant_audio_plays_in_order_and_completes_with_an_artifact() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");

    h.transport.push(json!({
        "type": "conversation.item.created",
        "item": {"id": "item_a", "role": "assistant", "status": "in_progress", "content": []}
    }));
    for delta in ["AQA=", "AgA=", "AwA="] {
        h.transport
            .push(json!({"type": "response.audio.delta", "item_id": "item_a", "delta": delta}));
    }
    h.transport.push(json!({
        "type": "response.audio_transcript.delta", "item_id": "item_a", "delta": "Hi"
    }));
    h.transport.push(json!({
        "type": "response.output_item.done",
        "item": {
            "id": "item_a",
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "audio", "transcript": "Hi"}]
        }
    }));
    for _ in 0..6 {
        assert!(h.session.process_next().await.expect("event should apply"));
    }

    let writes = h.speaker.state().writes.clone();
    assert_eq!(
        writes,
        vec![
            ("item_a".to_string(), vec![1]),
            ("item_a".to_string(), vec![2]),
            ("item_a".to_string(), vec![3]),
        ]
    );

    let items = h.session.items();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.role, ItemRole::Assistant);
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.transcript, "Hi");
    assert_eq!(item.audio_bytes, 6);
    let artifact = item.artifact.as_ref().expect("completed item should carry audio");
    assert_eq!(artifact.samples, vec![1, 2, 3]);
    assert_eq!(artifact.sample_rate, 24_000);

    assert_eq!(
        summary(h.session.events())[3..].to_vec(),
        vec![
            (EventSource::Server, "conversation.item.created".to_string(), 1),
            (EventSource::Server, "response.audio.delta".to_string(), 3),
            (EventSource::Server, "response.audio_transcript.delta".to_string(), 1),
            (EventSource::Server, "response.output_item.done".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn user_turn_carries_the_audio_between_speech_markers() {
    let mut config = relay_config();
    config.greeting = None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("connect should succeed");

    // 24 samples per millisecond at 24 kHz.
    h.mic.speak(&[7; 48]);
    assert!(h.session.process_next().await.expect("frame"));
    h.transport.push(json!({
        "type": "input_audio_buffer.speech_started", "item_id": "item_u", "audio_start_ms": 0
    }));
    h.transport.push(json!({
        "type": "input_audio_buffer.speech_stopped", "item_id": "item_u", "audio_end_ms": 1
    }));
    h.transport.push(json!({
        "type": "conversation.item.created",
        "item": {"id": "item_u", "role": "user", "status": "completed", "content": [{"type": "input_audio"}]}
    }));
    h.transport.push(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_u",
        "transcript": "hey"
    }));
    for _ in 0..4 {
        assert!(h.session.process_next().await.expect("event should apply"));
    }

    let item = h.session.conversation().get("item_u").expect("user item");
    assert_eq!(item.role, ItemRole::User);
    assert_eq!(item.transcript, "hey");
    assert_eq!(item.audio_bytes, 48);
    let artifact = item.artifact.expect("user item should carry its audio");
    assert_eq!(artifact.samples, vec![7; 24]);
}

#[tokio::test]
async fn subscribers_see_updates_in_processing_order() {
    let mut h = harness(ConnectBehavior::Accept);
    let mut updates = h.session.subscribe();
    h.session.connect().await.expect("connect should succeed");

    h.transport
        .push(json!({"type": "response.text.delta", "item_id": "item_t", "delta": "ok"}));
    assert!(h.session.process_next().await.expect("event should apply"));

    let received = updates.drain();
    assert_eq!(received[0], SessionUpdate::State(ConnectionState::Connecting));
    assert_eq!(received[1], SessionUpdate::State(ConnectionState::Connected));
    let kinds: Vec<&str> = received[2..]
        .iter()
        .map(|update| match update {
            SessionUpdate::State(_) => "state",
            SessionUpdate::Event(_) => "event",
            SessionUpdate::Conversation(_) => "conversation",
        })
        .collect();
    assert_eq!(kinds, vec!["event", "event", "event", "event", "conversation"]);
    match received.last() {
        Some(SessionUpdate::Conversation(update)) => {
            assert_eq!(update.item.id, "item_t");
            assert_eq!(update.delta, Some(ItemDelta::Text("ok".into())));
        }
        other => panic!("unexpected last update: {other:?}"),
    }

    assert!(h.session.unsubscribe(updates.id()));
    h.session.disconnect().await;
    assert!(updates.try_recv().is_none());
}

#[tokio::test]
async fn events_after_disconnect_are_discarded() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    h.session.disconnect().await;
    let logged = h.session.events().len();

    let late = ServerEvent::from_payload(json!({
        "type": "response.audio.delta", "item_id": "item_late", "delta": "AQA="
    }))
    .expect("typed payload");
    h.session.handle_server_event(late);

    assert_eq!(h.session.events().len(), logged);
    assert!(h.session.items().is_empty());
    assert!(h.speaker.state().writes.is_empty());
    assert!(!h.session.process_next().await.expect("disconnected step"));
}

#[tokio::test]
async fn remote_close_ends_the_session() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    h.transport.close_stream();

    assert!(!h.session.process_next().await.expect("close is not an error"));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert!(!h.mic.state().acquired);
}

#[tokio::test]
async fn server_errors_are_logged_without_ending_the_session() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    h.transport
        .push(json!({"type": "error", "error": {"message": "bad audio"}}));
    assert!(h.session.process_next().await.expect("event should apply"));

    assert_eq!(h.session.state(), ConnectionState::Connected);
    let last = h.session.events().last().expect("error record");
    assert_eq!(last.event_type, "error");
    assert_eq!(last.payload["error"]["message"], "bad audio");
}

#[tokio::test]
async fn reset_clears_items_and_log_but_keeps_the_connection() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    h.transport
        .push(json!({"type": "response.text.delta", "item_id": "item_t", "delta": "ok"}));
    assert!(h.session.process_next().await.expect("event should apply"));

    h.session.reset();
    assert!(h.session.items().is_empty());
    assert!(h.session.events().is_empty());
    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert_eq!(h.session.capture_status(), CaptureStatus::Recording);
}

#[tokio::test]
async fn interrupted_playback_reports_where_it_stopped() {
    let mut h = harness(ConnectBehavior::Accept);
    h.session.connect().await.expect("connect should succeed");
    h.transport.push(json!({
        "type": "response.audio.delta", "item_id": "item_a", "delta": "AQACAAMABAA="
    }));
    assert!(h.session.process_next().await.expect("event should apply"));
    h.speaker.advance(2);

    h.session.disconnect().await;
    let offset = h.session.last_interrupt().expect("playback was cut");
    assert_eq!(offset.item_id, "item_a");
    assert_eq!(offset.offset_samples, 2);
}

#[tokio::test]
async fn sending_while_disconnected_is_an_invalid_state() {
    let mut h = harness(ConnectBehavior::Accept);
    let error = h
        .session
        .append_input_audio(&[1, 2, 3])
        .await
        .expect_err("send should fail");
    assert!(matches!(error, ParleyError::InvalidState(_)));
    assert!(h.transport.sent().is_empty());
}

async fn finish_user_turn(h: &mut common::Harness, item_id: &str) {
    h.transport.push(json!({
        "type": "input_audio_buffer.speech_started", "item_id": item_id, "audio_start_ms": 0
    }));
    h.transport.push(json!({
        "type": "input_audio_buffer.speech_stopped", "item_id": item_id, "audio_end_ms": 1
    }));
    h.transport.push(json!({
        "type": "conversation.item.created",
        "item": {"id": item_id, "role": "user", "status": "completed", "content": []}
    }));
    for _ in 0..3 {
        assert!(h.session.process_next().await.expect("event should apply"));
    }
}

#[tokio::test]
async fn reconnect_slices_user_audio_from_the_new_connection_only() {
    let mut config = relay_config();
    config.greeting = None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("first connect should succeed");
    h.mic.speak(&[1; 48]);
    assert!(h.session.process_next().await.expect("frame"));
    h.session.disconnect().await;

    h.session.connect().await.expect("second connect should succeed");
    h.mic.speak(&[9; 48]);
    assert!(h.session.process_next().await.expect("frame"));
    finish_user_turn(&mut h, "item_u").await;

    let item = h.session.conversation().get("item_u").expect("user item");
    let artifact = item.artifact.expect("user item should carry its audio");
    assert_eq!(artifact.samples, vec![9; 24]);
}

#[tokio::test]
async fn rejected_input_audio_is_not_queued_for_the_next_turn() {
    let mut config = relay_config();
    config.greeting = None;
    let mut h = harness_with(config, ConnectBehavior::Accept, FakeMic::new());
    h.session.connect().await.expect("connect should succeed");

    h.transport.state().connected = false;
    assert!(h.session.append_input_audio(&[5; 24]).await.is_err());
    h.transport.state().connected = true;

    h.mic.speak(&[9; 24]);
    assert!(h.session.process_next().await.expect("frame"));
    finish_user_turn(&mut h, "item_u").await;

    let item = h.session.conversation().get("item_u").expect("user item");
    let artifact = item.artifact.expect("user item should carry its audio");
    assert_eq!(artifact.samples, vec![9; 24]);
}
