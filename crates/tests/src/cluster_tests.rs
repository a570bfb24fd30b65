use crate::fixtures::bus::CountingBus;
use crate::fixtures::sinks::RecordingSink;
use crate::fixtures::test_app::{TestApp, next_event_of, test_settings};
use livescribe_services::{ClusterBus, LocalClusterBus, SessionState, TranscriptBroadcaster, TranscriptEvent};
use std::sync::Arc;
use std::time::Duration;

fn transcript(text: &str) -> TranscriptEvent {
    TranscriptEvent {
        meeting_uuid: "meeting-1".to_string(),
        speaker_id: "u1".to_string(),
        speaker_name: Some("Bob".to_string()),
        text: text.to_string(),
        timestamp: 42,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_relay_delivers_exactly_once_without_bounce() {
    let bus = Arc::new(CountingBus::new(Arc::new(LocalClusterBus::new())));
    let a = TranscriptBroadcaster::new("instance-a", bus.clone());
    let b = TranscriptBroadcaster::new("instance-b", bus.clone());
    a.start_relay();
    b.start_relay();

    let sink_a = Arc::new(RecordingSink::default());
    let sink_b = Arc::new(RecordingSink::default());
    a.subscribe(sink_a.clone()).await.unwrap();
    b.subscribe(sink_b.clone()).await.unwrap();

    a.publish(transcript("from a")).await;
    settle().await;

    assert_eq!(sink_a.of_type("transcript").len(), 1);
    assert_eq!(sink_b.of_type("transcript").len(), 1);
    assert_eq!(sink_b.of_type("transcript")[0]["data"]["text"], "from a");

    // Only the origin published; the peer never re-published.
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].origin_instance_id, "instance-a");

    assert_eq!(a.recent().len(), 1);
    assert!(b.recent().is_empty());
}

#[tokio::test]
async fn test_session_notices_are_relayed() {
    let bus: Arc<dyn ClusterBus> = Arc::new(LocalClusterBus::new());
    let a = TranscriptBroadcaster::new("instance-a", bus.clone());
    let b = TranscriptBroadcaster::new("instance-b", bus);
    a.start_relay();
    b.start_relay();

    let sink_b = Arc::new(RecordingSink::default());
    b.subscribe(sink_b.clone()).await.unwrap();

    a.announce_session("meeting-1", SessionState::Started).await;
    settle().await;

    let notices = sink_b.of_type("session");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["data"]["state"], "started");
    assert_eq!(notices[0]["data"]["meeting_uuid"], "meeting-1");
}

#[tokio::test]
async fn test_subscriber_on_peer_instance_receives_transcript() {
    let bus: Arc<dyn ClusterBus> = Arc::new(LocalClusterBus::new());
    let app_a = TestApp::spawn_on_bus(test_settings(), "instance-a", bus.clone()).await;
    let app_b = TestApp::spawn_on_bus(test_settings(), "instance-b", bus).await;

    let mut ws_a = app_a.subscribe().await;
    let mut ws_b = app_b.subscribe().await;

    app_a.state.broadcaster.publish(transcript("cluster wide")).await;

    let on_a = next_event_of(&mut ws_a, "transcript").await;
    let on_b = next_event_of(&mut ws_b, "transcript").await;
    assert_eq!(on_a["data"]["text"], "cluster wide");
    assert_eq!(on_b["data"]["text"], "cluster wide");

    // No duplicate arrives later on either side.
    for ws in [&mut ws_a, &mut ws_b] {
        let extra = tokio::time::timeout(Duration::from_millis(300), next_event_of(ws, "transcript")).await;
        assert!(extra.is_err(), "duplicate delivery");
    }

    let polled_b = app_b.get_json("/api/transcript").await;
    assert!(polled_b["events"].as_array().unwrap().is_empty());
    let polled_a = app_a.get_json("/api/transcript").await;
    assert_eq!(polled_a["events"].as_array().unwrap().len(), 1);
}
