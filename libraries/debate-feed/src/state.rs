use indexmap::IndexMap;

use crate::envelope::Envelope;
use crate::event::{FeedEvent, POLL_SNAPSHOT};

/// Reactions older than the most recent `MAX_REACTIONS` are dropped.
pub const MAX_REACTIONS: usize = 50;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub poll_id: String,
    pub question: String,
    /// Display order.
    pub options: Vec<String>,
    pub counts: IndexMap<String, u64>,
    pub voters: u64,
}

impl Poll {
    /// A poll we only know about because somebody voted in it.
    pub fn from_first_vote(poll_id: String, option: String) -> Self {
        let mut counts = IndexMap::new();
        counts.insert(option.clone(), 1);
        Self {
            poll_id,
            question: String::new(),
            options: vec![option],
            counts,
            voters: 0,
        }
    }

    pub fn record_vote(&mut self, option: String) {
        *self.counts.entry(option.clone()).or_insert(0) += 1;
        if !self.options.contains(&option) {
            self.options.push(option);
        }
    }

    pub fn count(&self, option: &str) -> u64 {
        self.counts.get(option).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub q_id: String,
    pub text: String,
    pub spectator_hash: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub reaction: String,
    pub spectator_hash: String,
    pub timestamp: i64,
}

/// The reconciled view of a debate's spectator feed.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedState {
    pub polls: IndexMap<String, Poll>,
    pub questions: im::Vector<Question>,
    /// Oldest first, at most [`MAX_REACTIONS`] long.
    pub reactions: im::Vector<Reaction>,
    pub presence: u64,
    /// String form of the latest non-snapshot event timestamp.
    ///
    /// Last write wins. Nothing checks that it only moves forward.
    pub last_event_id: Option<String>,
}

impl FeedState {
    /// Fold one envelope into the state. Malformed payloads are logged and dropped.
    pub fn apply(&mut self, envelope: &Envelope) {
        if envelope.kind != POLL_SNAPSHOT {
            if let Some(marker) = envelope.marker() {
                self.last_event_id = Some(marker);
            }
        }

        match FeedEvent::decode(envelope) {
            Ok(event) => self.reconcile(event),
            Err(e) => log::warn!("Dropping `{}` event: {e}", envelope.kind),
        }
    }

    pub fn reconcile(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::PollSnapshot(polls) => {
                self.polls = polls
                    .into_iter()
                    .map(|poll| (poll.poll_id.clone(), poll))
                    .collect();
            }
            FeedEvent::Vote { poll_id, option } => match self.polls.get_mut(&poll_id) {
                Some(poll) => poll.record_vote(option),
                None => {
                    let poll = Poll::from_first_vote(poll_id.clone(), option);
                    self.polls.insert(poll_id, poll);
                }
            },
            FeedEvent::PollCreated(poll) => {
                self.polls.insert(poll.poll_id.clone(), poll);
            }
            // No dedup by qId: a redelivered question shows up twice.
            FeedEvent::Question(question) => self.questions.push_back(question),
            FeedEvent::Reaction(reaction) => {
                self.reactions.push_back(reaction);
                while self.reactions.len() > MAX_REACTIONS {
                    self.reactions.pop_front();
                }
            }
            FeedEvent::Presence { connected } => self.presence = connected,
            FeedEvent::Unknown(kind) => log::trace!("Ignoring `{kind}` event"),
        }
    }
}

impl crate::AppState for FeedState {
    type Event = Envelope;

    fn apply_event(mut self, event: &Envelope) -> Self {
        self.apply(event);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState as _;
    use serde_json::json;

    #[test]
    fn test_vote_on_unknown_poll_synthesizes_it() {
        let state = FeedState::default().apply_event(&Envelope::new(
            "vote",
            json!({"pollId": "p9", "option": "maybe"}),
            5,
        ));

        assert_eq!(
            state.polls.get("p9"),
            Some(&Poll::from_first_vote("p9".to_string(), "maybe".to_string()))
        );
        assert_eq!(state.polls["p9"].voters, 0);
        assert_eq!(state.last_event_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_vote_appends_new_option() {
        let mut poll = Poll::from_first_vote("p".to_string(), "a".to_string());
        poll.record_vote("b".to_string());
        poll.record_vote("a".to_string());

        assert_eq!(poll.options, vec!["a", "b"]);
        assert_eq!(poll.count("a"), 2);
        assert_eq!(poll.count("b"), 1);
        assert_eq!(poll.count("c"), 0);
    }

    #[test]
    fn test_poll_created_upserts() {
        let mut state = FeedState::default();
        state.apply(&Envelope::new("vote", json!({"pollId": "p", "option": "a"}), 1));
        state.apply(&Envelope::new(
            "poll_created",
            json!({"pollId": "p", "question": "Q?", "options": ["x", "y"]}),
            2,
        ));

        let poll = &state.polls["p"];
        assert_eq!(poll.question, "Q?");
        assert_eq!(poll.options, vec!["x", "y"]);
        assert!(poll.counts.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_marker() {
        let mut state = FeedState::default();
        state.apply(&Envelope::new("presence", json!({"connected": 1}), 100));
        state.apply(&Envelope::new("poll_snapshot", json!({"polls": []}), 200));
        assert_eq!(state.last_event_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_marker_regresses_on_out_of_order_delivery() {
        let mut state = FeedState::default();
        state.apply(&Envelope::new("presence", json!({"connected": 1}), 200));
        state.apply(&Envelope::new("presence", json!({"connected": 1}), 100));
        assert_eq!(state.last_event_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_marker_moves_even_when_payload_is_dropped() {
        let mut state = FeedState::default();
        state.apply(&Envelope::new("vote", json!({"pollId": 1}), 300));
        state.apply(&Envelope::new("confetti", json!(null), 400));
        assert!(state.polls.is_empty());
        assert_eq!(state.last_event_id.as_deref(), Some("400"));
    }

    #[test]
    fn test_questions_are_not_deduplicated() {
        let question = json!({
            "qId": "q1",
            "text": "Sources?",
            "spectatorHash": "h",
            "timestamp": 9,
        });
        let mut state = FeedState::default();
        state.apply(&Envelope::new("question", question.clone(), 9));
        state.apply(&Envelope::new("question", question, 9));

        assert_eq!(state.questions.len(), 2);
        assert_eq!(state.questions[0].q_id, "q1");
        assert_eq!(state.questions[1].timestamp, 9);
    }

    #[test]
    fn test_serializes_in_wire_casing() {
        let mut state = FeedState::default();
        state.apply(&Envelope::new("vote", json!({"pollId": "p", "option": "a"}), 1));
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["polls"]["p"]["pollId"], json!("p"));
        assert_eq!(value["lastEventId"], json!("1"));
    }
}
