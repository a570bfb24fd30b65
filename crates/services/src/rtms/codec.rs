use tokio_tungstenite::tungstenite::Message;

use super::error::CodecError;
use super::protocol::{OutboundMessage, RtmsMessage};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes one socket frame into a protocol message.
///
/// Text and binary frames both carry JSON; binary payloads may come with a
/// byte-order mark or NUL padding. Control frames yield `Ok(None)`.
pub fn decode_frame(frame: &Message) -> Result<Option<RtmsMessage>, CodecError> {
    let payload: &[u8] = match frame {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(bytes) => bytes,
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => {
            return Ok(None);
        }
    };
    let text = normalize(payload)?;
    RtmsMessage::parse(text).map(Some)
}

pub fn encode(message: &OutboundMessage) -> Result<Message, CodecError> {
    Ok(Message::text(serde_json::to_string(message)?))
}

fn normalize(payload: &[u8]) -> Result<&str, CodecError> {
    let payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
    let end = payload.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let payload = payload.get(..end).unwrap_or_default();
    let text = std::str::from_utf8(payload)?.trim();
    if text.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(text)
}
