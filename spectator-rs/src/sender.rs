//! Viewer-initiated commands. Sends only go out over an open socket; anything else is dropped
//! without buffering or telling the caller.

use serde_json::{Value, json};

use crate::transport::{ReadyState, Socket};

pub const JOIN: &str = "join";
pub const VOTE: &str = "vote";
pub const QUESTION: &str = "question";
pub const REACTION: &str = "reaction";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn vote(poll_id: &str, option: &str) -> Self {
        Self::new(VOTE, json!({ "pollId": poll_id, "option": option }))
    }

    pub fn question(text: &str) -> Self {
        Self::new(QUESTION, json!({ "text": text }))
    }

    pub fn reaction(reaction: &str) -> Self {
        Self::new(REACTION, json!({ "reaction": reaction }))
    }
}

pub(crate) fn send(socket: Option<&dyn Socket>, message: &OutboundMessage) {
    let Some(socket) = socket.filter(|socket| socket.ready_state() == ReadyState::Open) else {
        log::debug!("Not connected, dropping `{}` message", message.kind);
        return;
    };

    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to serialize `{}` message: {e}", message.kind);
            return;
        }
    };
    if let Err(e) = socket.send(text) {
        log::debug!("Dropping `{}` message: {e}", message.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let message = OutboundMessage::vote("p1", "yes");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "vote", "payload": {"pollId": "p1", "option": "yes"}})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::question("Why?")).unwrap(),
            json!({"type": "question", "payload": {"text": "Why?"}})
        );
        assert_eq!(OutboundMessage::reaction("👏").payload, json!({"reaction": "👏"}));
    }

    #[test]
    fn test_send_without_socket_is_a_no_op() {
        send(None, &OutboundMessage::reaction("🔥"));
    }
}
