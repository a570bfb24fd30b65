use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{self, ChannelCommand, ChannelHandle, ReadyAckForwarder, RtmsSocket};
use super::codec;
use super::error::RtmsError;
use super::protocol::{HandshakeResponse, OutboundMessage, RtmsMessage};
use super::registry::ConnectionRegistry;
use crate::broadcast::{TranscriptBroadcaster, TranscriptEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Connecting,
    DataHandshakeSent,
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaAction {
    Send(OutboundMessage),
    ForwardReady { stream_id: String },
    Publish(TranscriptEvent),
}

/// Protocol state of one media socket, independent of I/O.
#[derive(Debug)]
pub struct MediaSession {
    meeting_uuid: String,
    stream_id: String,
    protocol_version: u32,
    state: MediaState,
}

impl MediaSession {
    pub fn new(meeting_uuid: &str, stream_id: &str, protocol_version: u32) -> Self {
        Self {
            meeting_uuid: meeting_uuid.to_string(),
            stream_id: stream_id.to_string(),
            protocol_version,
            state: MediaState::Connecting,
        }
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn on_open(&mut self, signature: String) -> OutboundMessage {
        self.state = MediaState::DataHandshakeSent;
        OutboundMessage::data_handshake(
            self.protocol_version,
            &self.meeting_uuid,
            &self.stream_id,
            signature,
        )
    }

    pub fn on_message(&mut self, message: RtmsMessage) -> Vec<MediaAction> {
        if self.state == MediaState::Closed {
            return Vec::new();
        }

        match message {
            RtmsMessage::KeepAliveRequest { timestamp } => {
                vec![MediaAction::Send(OutboundMessage::keep_alive_response(timestamp))]
            }
            RtmsMessage::DataHandshakeResponse(response) => self.on_handshake_response(response),
            RtmsMessage::Transcript(frame) => {
                vec![MediaAction::Publish(frame.into_event(&self.meeting_uuid))]
            }
            other => {
                debug!(
                    meeting_uuid = %self.meeting_uuid,
                    msg_type = other.msg_type(),
                    "Ignoring unexpected message on media channel"
                );
                Vec::new()
            }
        }
    }

    pub fn on_closed(&mut self) {
        self.state = MediaState::Closed;
    }

    fn on_handshake_response(&mut self, response: HandshakeResponse) -> Vec<MediaAction> {
        if self.state != MediaState::DataHandshakeSent {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                state = ?self.state,
                "Data handshake response outside of handshake"
            );
            return Vec::new();
        }

        if !response.is_success() {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                stream_id = %self.stream_id,
                status_code = response.status_code,
                reason = ?response.reason,
                "Data handshake rejected"
            );
            return Vec::new();
        }

        self.state = MediaState::Ready;
        info!(meeting_uuid = %self.meeting_uuid, "Media channel ready");
        vec![MediaAction::ForwardReady {
            stream_id: self.stream_id.clone(),
        }]
    }
}

/// Handle to a running media channel, held by the registry.
#[derive(Debug, Clone)]
pub struct MediaHandle(ChannelHandle);

impl MediaHandle {
    pub fn connection_id(&self) -> Uuid {
        self.0.connection_id()
    }

    pub fn close(&self) {
        self.0.close();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Task that owns the media socket for one meeting.
pub(crate) struct MediaChannel {
    session: MediaSession,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<TranscriptBroadcaster>,
    ready_ack: Arc<dyn ReadyAckForwarder>,
    meeting_uuid: String,
    stream_id: String,
    url: String,
    connection_id: Uuid,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
}

impl MediaChannel {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        meeting_uuid: &str,
        stream_id: &str,
        url: String,
        ready_ack: Arc<dyn ReadyAckForwarder>,
    ) -> (Self, MediaHandle) {
        let (handle, commands) = ChannelHandle::new();
        let channel = Self {
            session: MediaSession::new(meeting_uuid, stream_id, registry.protocol_version()),
            broadcaster: registry.broadcaster(),
            registry,
            ready_ack,
            meeting_uuid: meeting_uuid.to_string(),
            stream_id: stream_id.to_string(),
            url,
            connection_id: handle.connection_id(),
            commands,
        };
        (channel, MediaHandle(handle))
    }

    pub(crate) async fn run(mut self) {
        let connection_id = self.connection_id;
        info!(
            meeting_uuid = %self.meeting_uuid,
            %connection_id,
            url = %self.url,
            "Opening media channel"
        );

        if let Err(e) = self.drive().await {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                %connection_id,
                error = %e,
                "Media channel failed"
            );
        }

        self.session.on_closed();
        self.registry.clear_media(&self.meeting_uuid, connection_id);
        info!(meeting_uuid = %self.meeting_uuid, %connection_id, "Media channel closed");
    }

    async fn drive(&mut self) -> Result<(), RtmsError> {
        let signature = self
            .registry
            .signer()
            .sign_stream(&self.meeting_uuid, &self.stream_id)?;

        let Some(mut socket) = channel::open_socket(&self.url, &mut self.commands).await? else {
            debug!(meeting_uuid = %self.meeting_uuid, "Media channel closed before connecting");
            return Ok(());
        };

        let handshake = self.session.on_open(signature);
        channel::send_message(&mut socket, &handshake).await?;
        debug!(meeting_uuid = %self.meeting_uuid, "Data handshake sent");

        loop {
            tokio::select! {
                biased;
                frame = socket.next() => {
                    let Some(frame) = frame else { break };
                    let frame = frame?;
                    if matches!(frame, Message::Close(_)) {
                        debug!(meeting_uuid = %self.meeting_uuid, "Media socket closed by remote");
                        break;
                    }
                    self.on_frame(&mut socket, &frame).await?;
                }
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Send(message)) => {
                        channel::send_message(&mut socket, &message).await?;
                    }
                    Some(ChannelCommand::Close) | None => {
                        let _ = socket.close(None).await;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, socket: &mut RtmsSocket, frame: &Message) -> Result<(), RtmsError> {
        let message = match codec::decode_frame(frame) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(meeting_uuid = %self.meeting_uuid, error = %e, "Dropping malformed media frame");
                return Ok(());
            }
        };

        for action in self.session.on_message(message) {
            match action {
                MediaAction::Send(reply) => channel::send_message(socket, &reply).await?,
                MediaAction::ForwardReady { stream_id } => {
                    if let Err(e) = self.ready_ack.forward_ready_ack(&stream_id) {
                        warn!(
                            meeting_uuid = %self.meeting_uuid,
                            error = %e,
                            "Could not forward ready acknowledgment to signaling channel"
                        );
                    }
                }
                MediaAction::Publish(event) => self.broadcaster.publish(event).await,
            }
        }
        Ok(())
    }
}
