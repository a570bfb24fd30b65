use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use livescribe_services::ChannelSink;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Events queued per subscriber before it counts as too slow and is dropped.
const SUBSCRIBER_BUFFER: usize = 256;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut outbound) = ChannelSink::new(SUBSCRIBER_BUFFER);

    let Some(subscriber) = state.broadcaster.subscribe(Arc::new(sink)).await else {
        warn!(%connection_id, "Subscriber rejected");
        return;
    };
    info!(%connection_id, ?subscriber, "Subscriber connected");

    loop {
        tokio::select! {
            text = outbound.recv() => {
                // None once the broadcaster has dropped this sink.
                let Some(text) = text else { break };
                if let Err(e) = sender.send(Message::text(text.to_string())).await {
                    debug!(%connection_id, error = %e, "Subscriber write failed");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(%connection_id, error = %e, "Subscriber socket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    state.broadcaster.unsubscribe(subscriber);
    info!(%connection_id, "Subscriber disconnected");
}
