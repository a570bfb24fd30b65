use std::sync::Arc;

use dashmap::DashMap;
use livescribe_config::RtmsSettings;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::ReadyAckForwarder;
use super::endpoint::resolve_url;
use super::error::RtmsError;
use super::media::{MediaChannel, MediaHandle};
use super::signaling::{SignalingChannel, SignalingHandle};
use super::signature::SignatureProvider;
use crate::broadcast::TranscriptBroadcaster;

/// Channel handles for one meeting. A slot is `None` once its channel closed.
#[derive(Debug)]
pub struct MeetingSession {
    pub stream_id: String,
    pub signaling: Option<SignalingHandle>,
    pub media: Option<MediaHandle>,
}

impl MeetingSession {
    fn is_empty(&self) -> bool {
        self.signaling.is_none() && self.media.is_none()
    }

    fn close(&self) {
        if let Some(signaling) = &self.signaling {
            signaling.close();
        }
        if let Some(media) = &self.media {
            media.close();
        }
    }
}

/// Owns the signaling/media channel pair of every live meeting.
///
/// Entries are keyed by meeting UUID. All map access is entry-scoped and no
/// guard is held across an await or a socket operation.
pub struct ConnectionRegistry {
    sessions: DashMap<String, MeetingSession>,
    signer: SignatureProvider,
    protocol_version: u32,
    broadcaster: Arc<TranscriptBroadcaster>,
}

impl ConnectionRegistry {
    pub fn new(
        signer: SignatureProvider,
        protocol_version: u32,
        broadcaster: Arc<TranscriptBroadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            signer,
            protocol_version,
            broadcaster,
        })
    }

    pub fn from_settings(settings: &RtmsSettings, broadcaster: Arc<TranscriptBroadcaster>) -> Arc<Self> {
        let signer = SignatureProvider::new(settings.client_id.clone(), settings.client_secret.clone());
        if !signer.has_secret() {
            warn!("RTMS client secret is not configured; sessions will fail to authenticate");
        }
        Self::new(signer, settings.protocol_version, broadcaster)
    }

    pub fn signer(&self) -> &SignatureProvider {
        &self.signer
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn broadcaster(&self) -> Arc<TranscriptBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Opens the signaling channel for a newly started meeting stream.
    ///
    /// Returns `RtmsError::NoSignalingUrl` when none of the candidates is
    /// usable; the session is dropped and nothing is opened.
    pub fn register(
        self: &Arc<Self>,
        meeting_uuid: &str,
        stream_id: &str,
        candidates: &Value,
    ) -> Result<(), RtmsError> {
        let Some(url) = resolve_url(candidates) else {
            warn!(
                %meeting_uuid,
                %stream_id,
                %candidates,
                "Dropping session: no usable signaling URL"
            );
            return Err(RtmsError::NoSignalingUrl {
                meeting_uuid: meeting_uuid.to_string(),
            });
        };

        let (channel, handle) = SignalingChannel::new(Arc::clone(self), meeting_uuid, stream_id, url);
        let previous = self.sessions.insert(
            meeting_uuid.to_string(),
            MeetingSession {
                stream_id: stream_id.to_string(),
                signaling: Some(handle),
                media: None,
            },
        );
        if let Some(previous) = previous {
            warn!(%meeting_uuid, "Meeting re-registered; closing previous channels");
            previous.close();
        }

        tokio::spawn(channel.run());
        info!(%meeting_uuid, %stream_id, "Meeting registered");
        Ok(())
    }

    /// Opens the media channel once signaling has discovered its endpoint.
    ///
    /// Attaches only while `signaling_connection_id` still owns the meeting's
    /// signaling slot, so a superseded or deregistered signaling channel
    /// never opens media.
    pub(crate) fn open_media(
        self: &Arc<Self>,
        meeting_uuid: &str,
        signaling_connection_id: Uuid,
        stream_id: &str,
        url: String,
        ready_ack: Arc<dyn ReadyAckForwarder>,
    ) -> bool {
        let (channel, handle) =
            MediaChannel::new(Arc::clone(self), meeting_uuid, stream_id, url, ready_ack);

        let previous = match self.sessions.get_mut(meeting_uuid) {
            Some(mut session)
                if session
                    .signaling
                    .as_ref()
                    .is_some_and(|h| h.connection_id() == signaling_connection_id) =>
            {
                Some(session.media.replace(handle))
            }
            _ => None,
        };

        match previous {
            None => {
                debug!(
                    %meeting_uuid,
                    %signaling_connection_id,
                    "Signaling channel no longer current; media channel not opened"
                );
                false
            }
            Some(previous) => {
                if let Some(previous) = previous {
                    warn!(%meeting_uuid, "Replacing existing media channel");
                    previous.close();
                }
                tokio::spawn(channel.run());
                true
            }
        }
    }

    /// Clears the signaling slot if it still belongs to `connection_id`.
    pub fn clear_signaling(&self, meeting_uuid: &str, connection_id: Uuid) {
        let now_empty = match self.sessions.get_mut(meeting_uuid) {
            Some(mut session) => {
                if session
                    .signaling
                    .as_ref()
                    .is_some_and(|h| h.connection_id() == connection_id)
                {
                    session.signaling = None;
                    debug!(%meeting_uuid, %connection_id, "Signaling slot cleared");
                }
                session.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sessions.remove_if(meeting_uuid, |_, session| session.is_empty());
        }
    }

    /// Clears the media slot if it still belongs to `connection_id`.
    pub fn clear_media(&self, meeting_uuid: &str, connection_id: Uuid) {
        let now_empty = match self.sessions.get_mut(meeting_uuid) {
            Some(mut session) => {
                if session
                    .media
                    .as_ref()
                    .is_some_and(|h| h.connection_id() == connection_id)
                {
                    session.media = None;
                    debug!(%meeting_uuid, %connection_id, "Media slot cleared");
                }
                session.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sessions.remove_if(meeting_uuid, |_, session| session.is_empty());
        }
    }

    /// Closes both channels of a meeting and forgets it. Idempotent.
    pub fn deregister(&self, meeting_uuid: &str) -> bool {
        match self.sessions.remove(meeting_uuid) {
            Some((_, session)) => {
                session.close();
                info!(%meeting_uuid, "Meeting deregistered");
                true
            }
            None => {
                debug!(%meeting_uuid, "Deregister for unknown meeting ignored");
                false
            }
        }
    }

    /// Closes every channel; used on shutdown.
    pub fn close_all(&self) {
        let meetings = self.active_meetings();
        for meeting_uuid in meetings {
            self.deregister(&meeting_uuid);
        }
    }

    pub fn active_meetings(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_registered(&self, meeting_uuid: &str) -> bool {
        self.sessions.contains_key(meeting_uuid)
    }

    pub fn has_signaling(&self, meeting_uuid: &str) -> bool {
        self.sessions
            .get(meeting_uuid)
            .is_some_and(|session| session.signaling.is_some())
    }

    pub fn has_media(&self, meeting_uuid: &str) -> bool {
        self.sessions
            .get(meeting_uuid)
            .is_some_and(|session| session.media.is_some())
    }
}
