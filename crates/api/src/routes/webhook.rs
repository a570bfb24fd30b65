use axum::{Json, extract::State};
use livescribe_services::{SessionState, rtms::signature::sign_webhook_token};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{error::ApiError, state::AppState};

pub const RTMS_STARTED: &str = "meeting.rtms_started";
pub const RTMS_STOPPED: &str = "meeting.rtms_stopped";
pub const URL_VALIDATION: &str = "endpoint.url_validation";

/// Lifecycle notification as posted by the meeting platform.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct RtmsStarted {
    meeting_uuid: String,
    rtms_stream_id: String,
    #[serde(default)]
    server_urls: Value,
}

#[derive(Debug, Deserialize)]
struct RtmsStopped {
    meeting_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UrlValidation {
    plain_token: String,
}

pub async fn webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<Value>, ApiError> {
    debug!(event = %event.event, "Webhook received");

    match event.event.as_str() {
        RTMS_STARTED => {
            let started: RtmsStarted = parse_payload(event.payload)?;
            if let Err(e) = state.registry.register(
                &started.meeting_uuid,
                &started.rtms_stream_id,
                &started.server_urls,
            ) {
                warn!(meeting_uuid = %started.meeting_uuid, error = %e, "Session not started");
                return Ok(Json(json!({ "status": "dropped", "reason": e.to_string() })));
            }
            state
                .broadcaster
                .announce_session(&started.meeting_uuid, SessionState::Started)
                .await;
            Ok(Json(json!({ "status": "ok" })))
        }
        RTMS_STOPPED => {
            let stopped: RtmsStopped = parse_payload(event.payload)?;
            let removed = state.registry.deregister(&stopped.meeting_uuid);
            if removed {
                state
                    .broadcaster
                    .announce_session(&stopped.meeting_uuid, SessionState::Stopped)
                    .await;
            }
            Ok(Json(json!({ "status": "ok", "deregistered": removed })))
        }
        URL_VALIDATION => {
            let challenge: UrlValidation = parse_payload(event.payload)?;
            let secret = state
                .settings
                .rtms
                .webhook_secret_token
                .as_deref()
                .unwrap_or_default();
            let encrypted = sign_webhook_token(&challenge.plain_token, secret)?;
            info!("Answered endpoint validation challenge");
            Ok(Json(json!({
                "plainToken": challenge.plain_token,
                "encryptedToken": encrypted,
            })))
        }
        other => {
            debug!(event = %other, "Ignoring webhook event");
            Ok(Json(json!({ "status": "ignored" })))
        }
    }
}

fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook payload: {e}")))
}
