//! # Envelope
//! Every inbound realtime message is wrapped in `{type, payload, timestamp}`.
//! Decoding never fails loudly: anything we can't make sense of becomes `None`.

use serde_json::Value;

/// The wire wrapper for all inbound realtime events.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Value,
}

/// A message as handed to us by the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum RawMessage {
    /// A serialized message, usually a text frame.
    Text(String),
    /// A message that was already decoded upstream.
    Structured(Value),
    /// Binary frames carry no envelope.
    Binary(Vec<u8>),
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        RawMessage::Text(text)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        RawMessage::Text(text.to_string())
    }
}

impl From<Value> for RawMessage {
    fn from(value: Value) -> Self {
        RawMessage::Structured(value)
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(bytes: Vec<u8>) -> Self {
        RawMessage::Binary(bytes)
    }
}

/// Parse an inbound message into an [`Envelope`].
///
/// Returns `None` for null input, binary frames, and anything that doesn't decode. The caller
/// should treat `None` as "ignore this message".
pub fn parse(raw: impl Into<RawMessage>) -> Option<Envelope> {
    let value = match raw.into() {
        RawMessage::Structured(Value::Null) => return None,
        RawMessage::Structured(value) => value,
        RawMessage::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to parse message as JSON: {e}");
                return None;
            }
        },
        RawMessage::Binary(bytes) => {
            log::debug!("Ignoring {} byte binary frame", bytes.len());
            return None;
        }
    };

    serde_json::from_value::<Envelope>(value)
        .inspect_err(|e| log::warn!("Message is not an event envelope: {e}"))
        .ok()
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value, timestamp: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: timestamp.into(),
        }
    }

    /// The resume marker carried by this envelope, if it carries a timestamp at all.
    ///
    /// Zero, empty strings and non-scalar values don't count as a timestamp.
    pub fn marker(&self) -> Option<String> {
        match &self.timestamp {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    (i != 0).then(|| i.to_string())
                } else if let Some(u) = n.as_u64() {
                    Some(u.to_string())
                } else {
                    let f = n.as_f64()?;
                    if f == 0.0 || !f.is_finite() {
                        None
                    } else if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        Some((f as i64).to_string())
                    } else {
                        Some(f.to_string())
                    }
                }
            }
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_frame() {
        let envelope =
            parse(r#"{"type":"presence","payload":{"connected":3},"timestamp":1700000000000}"#)
                .unwrap();
        assert_eq!(envelope.kind, "presence");
        assert_eq!(envelope.payload, json!({"connected": 3}));
        assert_eq!(envelope.marker().as_deref(), Some("1700000000000"));
    }

    #[test]
    fn test_parse_structured_passes_through() {
        let envelope = parse(json!({"type": "vote", "payload": {"pollId": "p", "option": "a"}}))
            .unwrap();
        assert_eq!(envelope.kind, "vote");
        assert_eq!(envelope.timestamp, Value::Null);
        assert_eq!(envelope.marker(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse("not json"), None);
        assert_eq!(parse(Value::Null), None);
        assert_eq!(parse(json!(42)), None);
        assert_eq!(parse(json!({"payload": {}})), None);
        assert_eq!(parse(b"{\"type\":\"vote\"}".to_vec()), None);
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let envelope = parse(r#"{"type":"mystery"}"#).unwrap();
        assert_eq!(envelope.payload, Value::Null);
    }

    #[test]
    fn test_marker_forms() {
        let with = |timestamp: Value| Envelope::new("x", Value::Null, timestamp).marker();

        assert_eq!(with(json!(0)), None);
        assert_eq!(with(json!("")), None);
        assert_eq!(with(json!({"at": 1})), None);
        assert_eq!(with(json!(12.5)).as_deref(), Some("12.5"));
        assert_eq!(with(json!(1.7e12)).as_deref(), Some("1700000000000"));
        assert_eq!(with(json!("abc")).as_deref(), Some("abc"));
        assert_eq!(with(json!(u64::MAX)), Some(u64::MAX.to_string()));
    }
}
