use axum::{
    Json,
    extract::{Query, State},
};
use livescribe_services::RecentTranscripts;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    /// Only events with a timestamp strictly greater than this (ms).
    pub since: Option<i64>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<TranscriptQuery>,
) -> Json<RecentTranscripts> {
    Json(state.broadcaster.recent_since(query.since.unwrap_or(i64::MIN)))
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub instance_id: String,
    pub meetings: Vec<String>,
    pub subscribers: usize,
}

pub async fn sessions(State(state): State<AppState>) -> Json<SessionSummary> {
    let mut meetings = state.registry.active_meetings();
    meetings.sort();
    Json(SessionSummary {
        instance_id: state.instance_id.clone(),
        meetings,
        subscribers: state.broadcaster.subscriber_count(),
    })
}
