use crate::fixtures::bus::SlowBus;
use crate::fixtures::mock_rtms::{MockPeer, MockRtmsServer};
use crate::fixtures::test_app::{CLIENT_ID, CLIENT_SECRET, TestApp, next_event_of, test_settings};
use livescribe_services::rtms::signature::{Identity, sign};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

const MEETING: &str = "meeting-abc";
const STREAM: &str = "stream-xyz";

async fn start_meeting(app: &TestApp, candidates: Value) {
    start_stream(app, MEETING, STREAM, candidates).await;
}

async fn start_stream(app: &TestApp, meeting_uuid: &str, stream_id: &str, candidates: Value) {
    let resp = app
        .post_webhook(json!({
            "event": "meeting.rtms_started",
            "payload": {
                "meeting_uuid": meeting_uuid,
                "rtms_stream_id": stream_id,
                "server_urls": candidates,
            }
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

async fn establish(
    app: &TestApp,
    signaling: &mut MockRtmsServer,
    media: &mut MockRtmsServer,
) -> (MockPeer, MockPeer) {
    establish_stream(app, MEETING, STREAM, signaling, media).await
}

/// Runs both handshakes for one meeting stream and returns the two live peers.
async fn establish_stream(
    app: &TestApp,
    meeting_uuid: &str,
    stream_id: &str,
    signaling: &mut MockRtmsServer,
    media: &mut MockRtmsServer,
) -> (MockPeer, MockPeer) {
    start_stream(app, meeting_uuid, stream_id, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    let handshake = sig.recv_json().await;
    assert_eq!(handshake["msg_type"], 1);
    assert_eq!(handshake["meeting_uuid"], meeting_uuid);
    sig.send_json(json!({
        "msg_type": 2,
        "status_code": 0,
        "media_server": { "server_urls": { "all": media.url() } }
    }))
    .await;

    let mut med = media.accept().await;
    let data_handshake = med.recv_json().await;
    assert_eq!(data_handshake["msg_type"], 3);
    med.send_json(json!({ "msg_type": 4, "status_code": 0 })).await;

    let ack = sig.recv_json().await;
    assert_eq!(ack, json!({ "msg_type": 7, "rtms_stream_id": stream_id }));

    (sig, med)
}

async fn assert_keep_alive(peer: &mut MockPeer, timestamp: i64) {
    peer.send_json(json!({ "msg_type": 12, "timestamp": timestamp })).await;
    assert_eq!(
        peer.recv_json().await,
        json!({ "msg_type": 13, "timestamp": timestamp })
    );
}

#[tokio::test]
async fn test_full_session_flow() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;

    start_meeting(&app, json!([{ "all": signaling.url() }])).await;

    // Signaling handshake carries the signed identity
    let mut sig = signaling.accept().await;
    let handshake = sig.recv_json().await;
    let expected_signature = sign(
        &Identity {
            client_id: CLIENT_ID,
            meeting_uuid: MEETING,
            stream_id: STREAM,
        },
        CLIENT_SECRET,
    )
    .unwrap();
    assert_eq!(handshake["msg_type"], 1);
    assert_eq!(handshake["protocol_version"], 1);
    assert_eq!(handshake["meeting_uuid"], MEETING);
    assert_eq!(handshake["rtms_stream_id"], STREAM);
    assert_eq!(handshake["signature"], expected_signature);
    assert!(handshake["sequence"].is_u64());

    sig.send_json(json!({
        "msg_type": 2,
        "status_code": 0,
        "media_server": { "server_urls": { "all": media.url() } }
    }))
    .await;

    // Data handshake requests transcript only, unencrypted
    let mut med = media.accept().await;
    let data_handshake = med.recv_json().await;
    assert_eq!(data_handshake["msg_type"], 3);
    assert_eq!(data_handshake["media_type"], 8);
    assert_eq!(data_handshake["payload_encryption"], false);
    assert_eq!(data_handshake["signature"], expected_signature);

    med.send_json(json!({ "msg_type": 4, "status_code": 0 })).await;
    let ack = sig.recv_json().await;
    assert_eq!(ack, json!({ "msg_type": 7, "rtms_stream_id": STREAM }));
    assert!(app.state.registry.has_media(MEETING));

    let mut subscriber = app.subscribe().await;

    med.send_json(json!({
        "msg_type": 17,
        "content": {
            "user_id": 16778240,
            "user_name": "Alice",
            "data": "hello everyone",
            "timestamp": 1727461234567_i64
        }
    }))
    .await;

    let event = next_event_of(&mut subscriber, "transcript").await;
    assert_eq!(event["data"]["text"], "hello everyone");
    assert_eq!(event["data"]["speaker_id"], "16778240");
    assert_eq!(event["data"]["speaker_name"], "Alice");
    assert_eq!(event["data"]["meeting_uuid"], MEETING);

    let recent = app.get_json("/api/transcript").await;
    assert_eq!(recent["events"].as_array().unwrap().len(), 1);
    assert_eq!(recent["events"][0]["text"], "hello everyone");

    // Stop closes both sockets and forgets the meeting
    let resp = app
        .post_webhook(json!({
            "event": "meeting.rtms_stopped",
            "payload": { "meeting_uuid": MEETING }
        }))
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deregistered"], true);

    sig.expect_closed().await;
    med.expect_closed().await;
    assert_eq!(app.state.registry.session_count(), 0);

    let stopped = next_event_of(&mut subscriber, "session").await;
    assert_eq!(stopped["data"]["state"], "stopped");
}

#[tokio::test]
async fn test_keep_alive_echoed_verbatim_on_both_channels() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (mut sig, mut med) = establish(&app, &mut signaling, &mut media).await;

    for raw in ["0", "-42", "1727461234567", "1.5"] {
        let request = format!(r#"{{"msg_type":12,"timestamp":{raw}}}"#);
        let expected: Value = serde_json::from_str(raw).unwrap();

        sig.send_raw(Message::text(request.clone())).await;
        let reply = sig.recv_json().await;
        assert_eq!(reply["msg_type"], 13);
        assert_eq!(reply["timestamp"], expected);

        med.send_raw(Message::text(request)).await;
        let reply = med.recv_json().await;
        assert_eq!(reply["msg_type"], 13);
        assert_eq!(reply["timestamp"], expected);
    }
}

#[tokio::test]
async fn test_keep_alive_answered_before_handshake_completes() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    sig.recv_json().await;
    sig.send_json(json!({ "msg_type": 12, "timestamp": 99 })).await;
    assert_eq!(sig.recv_json().await, json!({ "msg_type": 13, "timestamp": 99 }));
}

#[tokio::test]
async fn test_binary_frames_are_accepted() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    sig.recv_json().await;
    let response = json!({
        "msg_type": 2,
        "status_code": 0,
        "media_server": { "server_urls": media.url() }
    });
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(response.to_string().as_bytes());
    bytes.push(0);
    sig.send_raw(Message::binary(bytes)).await;

    let mut med = media.accept().await;
    assert_eq!(med.recv_json().await["msg_type"], 3);
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_channels() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (mut sig, mut med) = establish(&app, &mut signaling, &mut media).await;
    let mut subscriber = app.subscribe().await;

    sig.send_raw(Message::text("{not json")).await;
    sig.send_raw(Message::binary(vec![0xff, 0xfe])).await;
    sig.send_json(json!({ "status_code": 0 })).await;
    med.send_raw(Message::text("")).await;
    med.send_json(json!({ "msg_type": 17, "content": { "data": "no speaker" } }))
        .await;
    med.send_json(json!({ "msg_type": 99 })).await;

    sig.send_json(json!({ "msg_type": 12, "timestamp": 1 })).await;
    assert_eq!(sig.recv_json().await["msg_type"], 13);

    med.send_json(json!({
        "msg_type": 17,
        "content": { "user_id": "u2", "data": "still here", "timestamp": 5 }
    }))
    .await;
    let event = next_event_of(&mut subscriber, "transcript").await;
    assert_eq!(event["data"]["text"], "still here");
    assert!(event["data"].get("speaker_name").is_none());

    assert!(app.state.registry.has_signaling(MEETING));
    assert!(app.state.registry.has_media(MEETING));
}

#[tokio::test]
async fn test_rejected_handshake_keeps_signaling_open() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    sig.recv_json().await;
    sig.send_json(json!({
        "msg_type": 2,
        "status_code": 3,
        "reason": "invalid signature",
        "media_server": { "server_urls": media.url() }
    }))
    .await;

    media.assert_no_connection(Duration::from_millis(300)).await;
    sig.send_json(json!({ "msg_type": 12, "timestamp": 7 })).await;
    assert_eq!(sig.recv_json().await["timestamp"], 7);
    assert!(app.state.registry.has_signaling(MEETING));
    assert!(!app.state.registry.has_media(MEETING));
}

#[tokio::test]
async fn test_rejected_data_handshake_sends_no_ready_ack() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    sig.recv_json().await;
    sig.send_json(json!({
        "msg_type": 2,
        "status_code": 0,
        "media_server": { "server_urls": media.url() }
    }))
    .await;

    let mut med = media.accept().await;
    med.recv_json().await;
    med.send_json(json!({ "msg_type": 4, "status_code": 1 })).await;

    sig.assert_silent(Duration::from_millis(300)).await;
    assert!(app.state.registry.has_media(MEETING));
}

#[tokio::test]
async fn test_deregister_closes_both_channels() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (mut sig, mut med) = establish(&app, &mut signaling, &mut media).await;

    assert!(app.state.registry.deregister(MEETING));
    sig.expect_closed().await;
    med.expect_closed().await;
    assert!(!app.state.registry.deregister(MEETING));
    assert_eq!(app.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_deregister_leaves_other_meetings_running() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (mut sig, mut med) = establish(&app, &mut signaling, &mut media).await;
    let (mut other_sig, mut other_med) =
        establish_stream(&app, "meeting-other", "stream-other", &mut signaling, &mut media).await;
    let registry = app.state.registry.clone();
    assert_eq!(registry.session_count(), 2);

    assert!(!registry.deregister("never-registered"));
    assert_eq!(registry.session_count(), 2);
    assert!(registry.has_signaling(MEETING));
    assert!(registry.has_media(MEETING));
    assert_keep_alive(&mut sig, 1).await;
    assert_keep_alive(&mut med, 2).await;

    assert!(registry.deregister("meeting-other"));
    other_sig.expect_closed().await;
    other_med.expect_closed().await;

    assert_eq!(registry.session_count(), 1);
    assert!(registry.has_signaling(MEETING));
    assert!(registry.has_media(MEETING));
    assert_keep_alive(&mut sig, 3).await;
    assert_keep_alive(&mut med, 4).await;
}

#[tokio::test]
async fn test_slow_cluster_bus_does_not_delay_keep_alive() {
    let bus = Arc::new(SlowBus::new(Duration::from_secs(3)));
    let app = TestApp::spawn_on_bus(test_settings(), "instance-slow", bus).await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (_sig, mut med) = establish(&app, &mut signaling, &mut media).await;
    let mut subscriber = app.subscribe().await;

    med.send_json(json!({
        "msg_type": 17,
        "content": { "user_id": "u1", "data": "over a slow link", "timestamp": 10 }
    }))
    .await;
    let started = Instant::now();
    med.send_json(json!({ "msg_type": 12, "timestamp": 77 })).await;
    let reply = med.recv_json().await;
    let elapsed = started.elapsed();

    assert_eq!(reply, json!({ "msg_type": 13, "timestamp": 77 }));
    assert!(elapsed < Duration::from_millis(500), "keep-alive reply took {elapsed:?}");

    let event = next_event_of(&mut subscriber, "transcript").await;
    assert_eq!(event["data"]["text"], "over a slow link");
}

#[tokio::test]
async fn test_remote_close_clears_only_its_slot() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    let mut media = MockRtmsServer::start().await;
    let (sig, mut med) = establish(&app, &mut signaling, &mut media).await;

    sig.close().await;
    let registry = app.state.registry.clone();
    wait_until(|| !registry.has_signaling(MEETING)).await;
    assert!(registry.has_media(MEETING));

    med.send_json(json!({ "msg_type": 12, "timestamp": 3 })).await;
    assert_eq!(med.recv_json().await["timestamp"], 3);

    med.close().await;
    wait_until(|| registry.session_count() == 0).await;
}

#[tokio::test]
async fn test_unresolvable_url_opens_nothing() {
    let app = TestApp::spawn().await;
    let resp = app
        .post_webhook(json!({
            "event": "meeting.rtms_started",
            "payload": {
                "meeting_uuid": MEETING,
                "rtms_stream_id": STREAM,
                "server_urls": { "audio": "wss://elsewhere" }
            }
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "dropped");
    assert_eq!(app.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_missing_media_url_still_establishes() {
    let app = TestApp::spawn().await;
    let mut signaling = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    let mut sig = signaling.accept().await;
    sig.recv_json().await;
    sig.send_json(json!({ "msg_type": 2, "status_code": 0 })).await;

    sig.send_json(json!({ "msg_type": 12, "timestamp": 11 })).await;
    assert_eq!(sig.recv_json().await["timestamp"], 11);
    assert!(!app.state.registry.has_media(MEETING));
}

#[tokio::test]
async fn test_missing_secret_drops_session() {
    let app = TestApp::spawn_with_settings(|s| s.rtms.client_secret = None).await;
    let mut signaling = MockRtmsServer::start().await;
    start_meeting(&app, json!(signaling.url())).await;

    signaling
        .assert_no_connection(Duration::from_millis(300))
        .await;
    let registry = app.state.registry.clone();
    wait_until(|| registry.session_count() == 0).await;
}
