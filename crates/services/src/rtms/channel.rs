use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use uuid::Uuid;

use super::codec;
use super::error::RtmsError;
use super::protocol::OutboundMessage;

pub(crate) type RtmsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Work queued for a channel task from outside its read loop.
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    Send(OutboundMessage),
    Close,
}

/// Cheap, cloneable reference to a running channel task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    connection_id: Uuid,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = Self {
            connection_id: Uuid::new_v4(),
            commands,
        };
        (handle, rx)
    }

    /// Identifies one socket; a reconnect for the same meeting gets a new id.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Asks the task to close its socket. No-op once the task has exited.
    pub fn close(&self) {
        let _ = self.commands.send(ChannelCommand::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub(crate) fn send(&self, message: OutboundMessage) -> Result<(), RtmsError> {
        self.commands
            .send(ChannelCommand::Send(message))
            .map_err(|_| RtmsError::ChannelClosed)
    }
}

/// Lets the media channel confirm readiness over the signaling socket.
pub trait ReadyAckForwarder: Send + Sync {
    fn forward_ready_ack(&self, stream_id: &str) -> Result<(), RtmsError>;
}

/// Connects unless a close command arrives first. `Ok(None)` means closed before connecting.
pub(crate) async fn open_socket(
    url: &str,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
) -> Result<Option<RtmsSocket>, RtmsError> {
    tokio::select! {
        result = connect_async(url) => {
            let (socket, _response) = result?;
            Ok(Some(socket))
        }
        _ = wait_for_close(commands) => Ok(None),
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<ChannelCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            ChannelCommand::Close => return,
            ChannelCommand::Send(message) => {
                debug!(msg_type = message.msg_type(), "Dropping message queued before connect");
            }
        }
    }
}

pub(crate) async fn send_message(
    socket: &mut RtmsSocket,
    message: &OutboundMessage,
) -> Result<(), RtmsError> {
    socket.send(codec::encode(message)?).await?;
    Ok(())
}
