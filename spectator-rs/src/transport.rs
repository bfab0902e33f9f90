//! The seam between the connection lifecycle and whatever actually moves bytes.
//!
//! A [`Connector`] opens [`Socket`]s. Everything a socket observes comes back as a [`Delivery`]
//! tagged with the [`ConnectionId`] it was opened under, so the lifecycle manager can tell a
//! current connection from a superseded one.

use std::time::Duration;

use debate_feed::RawMessage;
use url::Url;

use crate::error::TransportError;

/// Identity of one connection attempt. Never reused within a manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(RawMessage),
    Error(String),
    Close,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

pub trait Socket: Send {
    fn url(&self) -> &Url;

    fn ready_state(&self) -> ReadyState;

    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Stop delivering events for this socket, then close it if it's open or opening.
    /// Calling it again does nothing.
    fn close(&self);
}

pub trait Connector: Send {
    /// Start opening a socket. `Open`, `Message`, `Error` and `Close` for it arrive later as
    /// deliveries tagged with `connection`; a failed attempt is reported the same way. An `Err`
    /// here means the attempt couldn't even be started.
    fn connect(
        &mut self,
        connection: ConnectionId,
        url: &Url,
        timeout: Duration,
    ) -> Result<Box<dyn Socket>, TransportError>;
}
