//! Typed decoding of envelope payloads.
//!
//! Each recognised `type` decodes into one [`FeedEvent`] variant, filling in defaults where the
//! wire left a field out. Payloads that can't be salvaged become a [`DecodeError`] and the event
//! is dropped by the reconciler.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::envelope::Envelope;
use crate::state::{Poll, Question, Reaction};

pub const POLL_SNAPSHOT: &str = "poll_snapshot";
pub const VOTE: &str = "vote";
pub const POLL_CREATED: &str = "poll_created";
pub const QUESTION: &str = "question";
pub const REACTION: &str = "reaction";
pub const PRESENCE: &str = "presence";

#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// Full replacement of the poll state, in display order.
    PollSnapshot(Vec<Poll>),
    Vote { poll_id: String, option: String },
    PollCreated(Poll),
    Question(Question),
    Reaction(Reaction),
    Presence { connected: u64 },
    /// Accepted but ignored.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("`{kind}` payload is not an object")]
    PayloadNotObject { kind: &'static str },

    #[error("`{kind}` payload field `{field}` must be a string")]
    NotAString {
        kind: &'static str,
        field: &'static str,
    },

    #[error("`{kind}` payload has no usable pollId")]
    MissingPollId { kind: &'static str },

    #[error("poll_snapshot payload has neither `polls` nor `pollState`")]
    UnknownSnapshotShape,
}

impl FeedEvent {
    pub fn decode(envelope: &Envelope) -> Result<Self, DecodeError> {
        let payload = &envelope.payload;
        match envelope.kind.as_str() {
            POLL_SNAPSHOT => decode_snapshot(payload).map(FeedEvent::PollSnapshot),
            VOTE => {
                let payload = object(payload, VOTE)?;
                let poll_id = string_field(payload, VOTE, "pollId")?;
                let option = string_field(payload, VOTE, "option")?;
                Ok(FeedEvent::Vote { poll_id, option })
            }
            POLL_CREATED => {
                let payload = object(payload, POLL_CREATED)?;
                normalize_poll(payload)
                    .map(FeedEvent::PollCreated)
                    .ok_or(DecodeError::MissingPollId { kind: POLL_CREATED })
            }
            QUESTION => {
                let payload = object(payload, QUESTION)?;
                Ok(FeedEvent::Question(Question {
                    q_id: coerce_string(payload.get("qId")),
                    text: coerce_string(payload.get("text")),
                    spectator_hash: coerce_string(payload.get("spectatorHash")),
                    timestamp: coerce_timestamp(payload.get("timestamp")),
                }))
            }
            REACTION => {
                let payload = object(payload, REACTION)?;
                Ok(FeedEvent::Reaction(Reaction {
                    reaction: coerce_string(payload.get("reaction")),
                    spectator_hash: coerce_string(payload.get("spectatorHash")),
                    timestamp: coerce_timestamp(payload.get("timestamp")),
                }))
            }
            PRESENCE => {
                let payload = object(payload, PRESENCE)?;
                Ok(FeedEvent::Presence {
                    connected: coerce_count(payload.get("connected")),
                })
            }
            other => Ok(FeedEvent::Unknown(other.to_string())),
        }
    }
}

fn object<'a>(
    payload: &'a Value,
    kind: &'static str,
) -> Result<&'a Map<String, Value>, DecodeError> {
    payload
        .as_object()
        .ok_or(DecodeError::PayloadNotObject { kind })
}

fn string_field(
    payload: &Map<String, Value>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    match payload.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(DecodeError::NotAString { kind, field }),
    }
}

fn decode_snapshot(payload: &Value) -> Result<Vec<Poll>, DecodeError> {
    let empty = Map::new();
    let payload = payload.as_object().unwrap_or(&empty);

    if let Some(Value::Array(polls)) = payload.get("polls") {
        return Ok(polls
            .iter()
            .filter_map(Value::as_object)
            .filter_map(normalize_poll)
            .collect());
    }

    // Older servers send counts keyed by poll id, with voters in a side table.
    if let Some(Value::Object(poll_state)) = payload.get("pollState") {
        let voters_count = payload.get("votersCount").and_then(Value::as_object);
        return Ok(poll_state
            .iter()
            .map(|(poll_id, counts)| {
                let counts = normalize_counts(Some(counts));
                let voters = match voters_count.and_then(|voters| voters.get(poll_id)) {
                    Some(voters @ Value::Number(_)) => coerce_count(Some(voters)),
                    _ => 0,
                };
                Poll {
                    poll_id: poll_id.clone(),
                    question: String::new(),
                    options: counts.keys().cloned().collect(),
                    counts,
                    voters,
                }
            })
            .collect());
    }

    Err(DecodeError::UnknownSnapshotShape)
}

/// Normalize a full poll object. Returns `None` if there's no usable `pollId`.
pub(crate) fn normalize_poll(poll: &Map<String, Value>) -> Option<Poll> {
    let poll_id = match poll.get("pollId")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if poll_id.is_empty() {
        return None;
    }

    let counts = normalize_counts(poll.get("counts"));
    let mut options: Vec<String> = match poll.get("options") {
        Some(Value::Array(options)) => options
            .iter()
            .filter_map(|option| match option {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .filter(|option| !option.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if options.is_empty() {
        options = counts.keys().cloned().collect();
    }

    Some(Poll {
        poll_id,
        question: match poll.get("question") {
            Some(Value::String(question)) => question.clone(),
            _ => String::new(),
        },
        options,
        counts,
        voters: coerce_count(poll.get("voters")),
    })
}

fn normalize_counts(counts: Option<&Value>) -> IndexMap<String, u64> {
    match counts {
        Some(Value::Object(counts)) => counts
            .iter()
            .map(|(option, value)| (option.clone(), coerce_count(Some(value))))
            .collect(),
        _ => IndexMap::new(),
    }
}

fn coerce_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

/// Coerce to a non-negative integer; fractions truncate, anything unusable is 0.
pub fn coerce_count(value: Option<&Value>) -> u64 {
    let n = coerce_number(value);
    if n > 0.0 { n.trunc() as u64 } else { 0 }
}

/// Coerce to integral milliseconds. Negative times are 0.
pub fn coerce_timestamp(value: Option<&Value>) -> i64 {
    coerce_number(value).max(0.0).trunc() as i64
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
