use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{self, ChannelCommand, ChannelHandle, ReadyAckForwarder, RtmsSocket};
use super::codec;
use super::error::RtmsError;
use super::protocol::{HandshakeResponse, OutboundMessage, RtmsMessage, StateUpdate};
use super::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Connecting,
    HandshakeSent,
    Established,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingAction {
    Send(OutboundMessage),
    OpenMedia { url: String },
}

/// Protocol state of one signaling socket, independent of I/O.
#[derive(Debug)]
pub struct SignalingSession {
    meeting_uuid: String,
    stream_id: String,
    protocol_version: u32,
    state: SignalingState,
}

impl SignalingSession {
    pub fn new(meeting_uuid: &str, stream_id: &str, protocol_version: u32) -> Self {
        Self {
            meeting_uuid: meeting_uuid.to_string(),
            stream_id: stream_id.to_string(),
            protocol_version,
            state: SignalingState::Connecting,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Builds the handshake request for a freshly opened socket.
    pub fn on_open(&mut self, signature: String, sequence: u32) -> OutboundMessage {
        self.state = SignalingState::HandshakeSent;
        OutboundMessage::signaling_handshake(
            self.protocol_version,
            &self.meeting_uuid,
            &self.stream_id,
            sequence,
            signature,
        )
    }

    pub fn on_message(&mut self, message: RtmsMessage) -> Vec<SignalingAction> {
        if self.state == SignalingState::Closed {
            return Vec::new();
        }

        match message {
            RtmsMessage::KeepAliveRequest { timestamp } => {
                vec![SignalingAction::Send(OutboundMessage::keep_alive_response(timestamp))]
            }
            RtmsMessage::SignalingHandshakeResponse(response) => self.on_handshake_response(response),
            RtmsMessage::StreamStateUpdate(update) => {
                self.log_state_update("stream", &update);
                Vec::new()
            }
            RtmsMessage::SessionStateUpdate(update) => {
                self.log_state_update("session", &update);
                Vec::new()
            }
            RtmsMessage::EventUpdate(event) => {
                debug!(meeting_uuid = %self.meeting_uuid, %event, "Signaling event update");
                Vec::new()
            }
            other => {
                debug!(
                    meeting_uuid = %self.meeting_uuid,
                    msg_type = other.msg_type(),
                    "Ignoring unexpected message on signaling channel"
                );
                Vec::new()
            }
        }
    }

    pub fn on_closed(&mut self) {
        self.state = SignalingState::Closed;
    }

    fn on_handshake_response(&mut self, response: HandshakeResponse) -> Vec<SignalingAction> {
        if self.state != SignalingState::HandshakeSent {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                state = ?self.state,
                "Signaling handshake response outside of handshake"
            );
            return Vec::new();
        }

        if !response.is_success() {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                stream_id = %self.stream_id,
                status_code = response.status_code,
                reason = ?response.reason,
                "Signaling handshake rejected"
            );
            return Vec::new();
        }

        self.state = SignalingState::Established;
        match response.media_url() {
            Some(url) => {
                info!(meeting_uuid = %self.meeting_uuid, %url, "Signaling handshake accepted");
                vec![SignalingAction::OpenMedia { url }]
            }
            None => {
                warn!(
                    meeting_uuid = %self.meeting_uuid,
                    "Signaling handshake accepted without a media endpoint; no transcripts will flow"
                );
                Vec::new()
            }
        }
    }

    fn log_state_update(&self, scope: &str, update: &StateUpdate) {
        info!(
            meeting_uuid = %self.meeting_uuid,
            scope,
            state = ?update.state,
            reason = ?update.reason,
            stop_reason = ?update.stop_reason,
            "RTMS state update"
        );
    }
}

/// Handle to a running signaling channel, held by the registry and by the
/// meeting's media channel.
#[derive(Debug, Clone)]
pub struct SignalingHandle(ChannelHandle);

impl SignalingHandle {
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

impl ReadyAckForwarder for SignalingHandle {
    fn forward_ready_ack(&self, stream_id: &str) -> Result<(), RtmsError> {
        self.0.send(OutboundMessage::client_ready_ack(stream_id))
    }
}

/// Task that owns the signaling socket for one meeting.
pub(crate) struct SignalingChannel {
    session: SignalingSession,
    registry: Arc<ConnectionRegistry>,
    meeting_uuid: String,
    stream_id: String,
    url: String,
    handle: SignalingHandle,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
}

impl SignalingChannel {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        meeting_uuid: &str,
        stream_id: &str,
        url: String,
    ) -> (Self, SignalingHandle) {
        let (handle, commands) = ChannelHandle::new();
        let handle = SignalingHandle(handle);
        let channel = Self {
            session: SignalingSession::new(meeting_uuid, stream_id, registry.protocol_version()),
            registry,
            meeting_uuid: meeting_uuid.to_string(),
            stream_id: stream_id.to_string(),
            url,
            handle: handle.clone(),
            commands,
        };
        (channel, handle)
    }

    pub(crate) async fn run(mut self) {
        let connection_id = self.handle.connection_id();
        info!(
            meeting_uuid = %self.meeting_uuid,
            stream_id = %self.stream_id,
            %connection_id,
            url = %self.url,
            "Opening signaling channel"
        );

        if let Err(e) = self.drive().await {
            warn!(
                meeting_uuid = %self.meeting_uuid,
                %connection_id,
                error = %e,
                "Signaling channel failed"
            );
        }

        self.session.on_closed();
        self.registry.clear_signaling(&self.meeting_uuid, connection_id);
        info!(meeting_uuid = %self.meeting_uuid, %connection_id, "Signaling channel closed");
    }

    async fn drive(&mut self) -> Result<(), RtmsError> {
        let signature = self
            .registry
            .signer()
            .sign_stream(&self.meeting_uuid, &self.stream_id)?;

        let Some(mut socket) = channel::open_socket(&self.url, &mut self.commands).await? else {
            debug!(meeting_uuid = %self.meeting_uuid, "Signaling channel closed before connecting");
            return Ok(());
        };

        let handshake = self.session.on_open(signature, rand::random());
        channel::send_message(&mut socket, &handshake).await?;
        debug!(meeting_uuid = %self.meeting_uuid, "Signaling handshake sent");

        loop {
            tokio::select! {
                biased;
                frame = socket.next() => {
                    let Some(frame) = frame else { break };
                    let frame = frame?;
                    if matches!(frame, Message::Close(_)) {
                        debug!(meeting_uuid = %self.meeting_uuid, "Signaling socket closed by remote");
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
                warn!(meeting_uuid = %self.meeting_uuid, error = %e, "Dropping malformed signaling frame");
                return Ok(());
            }
        };

        for action in self.session.on_message(message) {
            match action {
                SignalingAction::Send(reply) => channel::send_message(socket, &reply).await?,
                SignalingAction::OpenMedia { url } => {
                    self.registry.open_media(
                        &self.meeting_uuid,
                        self.handle.connection_id(),
                        &self.stream_id,
                        url,
                        Arc::new(self.handle.clone()),
                    );
                }
            }
        }
        Ok(())
    }
}
