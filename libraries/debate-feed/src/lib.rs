//! This is a library for reconciling a live debate spectator feed into client-side state.
//! It has no opinion on how the events arrive; `spectator` wires it to a WebSocket.
//!
//! Reconciliation strategy:
//! 1. Every inbound wire message is decoded into an [`Envelope`] (`{type, payload, timestamp}`).
//!    Anything that can't be decoded is dropped with a warning.
//! 2. Starting from a default [`FeedState`], envelopes are "applied" in delivery order.
//!    There is no reordering and no sequence numbers; the server is expected to resync us with
//!    a `poll_snapshot` from time to time.
//! 3. Snapshots replace the poll state wholesale. Everything else merges into it.
//!
//! Payloads cross a loosely-typed wire, so each event is decoded into a [`FeedEvent`] with
//! defaults for missing fields. Numbers follow a single coercion rule: numbers are taken as-is,
//! anything else is converted, and anything that fails to convert counts as zero.

pub mod envelope;
pub mod event;
pub mod state;

pub use envelope::{Envelope, RawMessage, parse};
pub use event::{DecodeError, FeedEvent};
pub use state::{FeedState, MAX_REACTIONS, Poll, Question, Reaction};

/// Core trait for folding events into a state.
pub trait AppState: Sized {
    type Event;

    /// Apply a single event, returning the next state.
    fn apply_event(self, event: &Self::Event) -> Self;
}

/// Fold `events` over `initial_state`, in iteration order.
pub fn apply_events<'a, A>(events: impl IntoIterator<Item = &'a A::Event>, initial_state: A) -> A
where
    A: AppState,
    A::Event: 'a,
{
    let mut state = initial_state;
    for event in events {
        state = state.apply_event(event);
    }
    state
}
