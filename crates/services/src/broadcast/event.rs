use serde::{Deserialize, Serialize};

/// One finalized utterance from a meeting's media stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub meeting_uuid: String,
    pub speaker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
    pub text: String,
    /// Milliseconds, as reported by the media server.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNotice {
    pub meeting_uuid: String,
    pub state: SessionState,
}

/// What a subscriber receives, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Transcript(TranscriptEvent),
    Session(SessionNotice),
    Connected { instance_id: String },
}

impl BroadcastEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transcript,
    Session,
}

/// Cross-instance wrapper. `origin_instance_id` lets the publisher drop its
/// own envelope when the bus echoes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin_instance_id: String,
    pub event_kind: EventKind,
    pub payload: serde_json::Value,
}

impl RelayEnvelope {
    pub fn wrap(origin_instance_id: &str, event: &BroadcastEvent) -> Option<Self> {
        let (event_kind, payload) = match event {
            BroadcastEvent::Transcript(e) => (EventKind::Transcript, serde_json::to_value(e)),
            BroadcastEvent::Session(n) => (EventKind::Session, serde_json::to_value(n)),
            BroadcastEvent::Connected { .. } => return None,
        };
        Some(Self {
            origin_instance_id: origin_instance_id.to_string(),
            event_kind,
            payload: payload.ok()?,
        })
    }

    pub fn into_event(self) -> serde_json::Result<BroadcastEvent> {
        Ok(match self.event_kind {
            EventKind::Transcript => BroadcastEvent::Transcript(serde_json::from_value(self.payload)?),
            EventKind::Session => BroadcastEvent::Session(serde_json::from_value(self.payload)?),
        })
    }
}

/// Response of a polling read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentTranscripts {
    pub events: Vec<TranscriptEvent>,
    pub server_time: i64,
}
