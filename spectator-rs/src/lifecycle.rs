//! # Connection lifecycle
//! [`ConnectionManager`] owns at most one connection, for one debate, at a time, and folds what
//! that connection delivers into a [`FeedState`].
//!
//! It does no I/O and keeps no timers of its own: sockets come from a [`Connector`], their events
//! are fed back through [`ConnectionManager::handle`], and reconnect delays are handed to whoever
//! drives the manager via [`ConnectionManager::take_scheduled_retry`].
//!
//! The critical property is the staleness guard. Every delivery carries the id of the connection
//! it came from, and anything not from the currently tracked connection is dropped before it
//! can touch state.

use std::time::Duration;

use debate_feed::{FeedState, parse};
use serde_json::{Value, json};
use slotmap::SlotMap;
use url::Url;

use crate::sender::{self, OutboundMessage};
use crate::storage::{self, KeyValueStore, SPECTATOR_HASH_KEY};
use crate::transport::{ConnectionId, Connector, Delivery, ReadyState, Socket, TransportEvent};
use crate::ws_url::WsUrlBuilder;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    #[default]
    Disconnected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectOptions {
    pub connection_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub grow_factor: f64,
    pub max_retries: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_millis(4000),
            min_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(10000),
            grow_factor: 1.3,
            max_retries: 10,
        }
    }
}

impl ReconnectOptions {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.min_delay.as_secs_f64() * self.grow_factor.powi(exponent);
        if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        }
    }
}

/// Identifies one scheduled reconnect. A ticket from before the latest acquire, release or
/// reconnect does nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryTicket(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub ticket: RetryTicket,
    pub delay: Duration,
}

/// Everything a host needs to render the feed.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatorSnapshot {
    pub debate_id: Option<String>,
    pub status: ConnectionStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub feed: FeedState,
}

impl SpectatorSnapshot {
    pub fn status_text(&self) -> String {
        match self.status {
            ConnectionStatus::Connected => "Connected".to_string(),
            ConnectionStatus::Connecting => "Connecting...".to_string(),
            ConnectionStatus::Reconnecting => {
                format!("Reconnecting ({}/{})...", self.retry_count, self.max_retries)
            }
            ConnectionStatus::Disconnected => "Disconnected".to_string(),
            ConnectionStatus::Error => "Connection Error".to_string(),
        }
    }
}

struct Tracked {
    id: ConnectionId,
    socket: Box<dyn Socket>,
}

type Listener = Box<dyn FnMut(&SpectatorSnapshot) + Send>;

pub struct ConnectionManager<C> {
    connector: C,
    urls: WsUrlBuilder,
    storage: Box<dyn KeyValueStore>,
    options: ReconnectOptions,

    debate_id: Option<String>,
    current: Option<Tracked>,
    last_connection_id: u64,
    status: ConnectionStatus,
    /// Reconnect attempts since the last successful open.
    attempt: u32,
    awaiting_retry: Option<RetryTicket>,
    scheduled_retry: Option<ScheduledRetry>,
    last_ticket: u64,
    last_error: Option<String>,
    spectator_hash: Option<String>,

    feed: FeedState,
    listeners: SlotMap<ListenerKey, Listener>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        urls: WsUrlBuilder,
        storage: Box<dyn KeyValueStore>,
        options: ReconnectOptions,
    ) -> Self {
        Self {
            connector,
            urls,
            storage,
            options,
            debate_id: None,
            current: None,
            last_connection_id: 0,
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            awaiting_retry: None,
            scheduled_retry: None,
            last_ticket: 0,
            last_error: None,
            spectator_hash: None,
            feed: FeedState::default(),
            listeners: SlotMap::with_key(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn debate_id(&self) -> Option<&str> {
        self.debate_id.as_deref()
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    /// URL of the tracked connection, if any.
    pub fn url(&self) -> Option<&Url> {
        self.current.as_ref().map(|tracked| tracked.socket.url())
    }

    pub fn snapshot(&self) -> SpectatorSnapshot {
        SpectatorSnapshot {
            debate_id: self.debate_id.clone(),
            status: self.status,
            retry_count: self.attempt,
            max_retries: self.options.max_retries,
            last_error: self.last_error.clone(),
            feed: self.feed.clone(),
        }
    }

    /// Get a connection for `debate_id`, reusing the tracked one if it's for the same debate and
    /// still open or opening. An empty id means there is no debate to watch, same as [`release`].
    ///
    /// [`release`]: Self::release
    pub fn acquire(&mut self, debate_id: &str) {
        if debate_id.trim().is_empty() {
            log::debug!("No debate id, releasing");
            self.release();
            return;
        }

        if self.debate_id.as_deref() == Some(debate_id) {
            if let Some(tracked) = &self.current {
                match tracked.socket.ready_state() {
                    ReadyState::Open => {
                        self.set_status(ConnectionStatus::Connected);
                        return;
                    }
                    ReadyState::Connecting => {
                        log::debug!("Already connecting to debate {debate_id}");
                        return;
                    }
                    ReadyState::Closing | ReadyState::Closed => self.detach(),
                }
            }
        } else {
            self.detach();
            self.feed = FeedState::default();
            self.debate_id = Some(debate_id.to_string());
        }

        self.attempt = 0;
        self.last_error = None;
        self.open_connection();
        self.notify();
    }

    /// Detach from and close the tracked connection. Safe to call any number of times.
    pub fn release(&mut self) {
        self.detach();
        self.debate_id = None;
        self.attempt = 0;
        self.set_status(ConnectionStatus::Disconnected);
        self.notify();
    }

    /// Start over for the current debate, e.g. after giving up on retries.
    pub fn reconnect(&mut self) {
        if self.debate_id.is_none() {
            log::debug!("Nothing to reconnect to");
            return;
        }
        self.detach();
        self.attempt = 0;
        self.last_error = None;
        self.open_connection();
        self.notify();
    }

    /// The spectator hash announced on join. Re-announces if we're already connected.
    pub fn set_spectator_hash(&mut self, spectator_hash: Option<String>) {
        self.spectator_hash = spectator_hash.filter(|hash| !hash.is_empty());
        if self.status == ConnectionStatus::Connected {
            self.announce();
        }
    }

    pub fn handle(&mut self, delivery: Delivery) {
        let Some(tracked) = &self.current else {
            log::debug!("Ignoring {:?} with no tracked connection", delivery.event);
            return;
        };
        if tracked.id != delivery.connection {
            log::debug!(
                "Ignoring {:?} from stale connection {:?}",
                delivery.event,
                delivery.connection
            );
            return;
        }

        match delivery.event {
            TransportEvent::Open => {
                self.attempt = 0;
                self.last_error = None;
                self.set_status(ConnectionStatus::Connected);
                self.announce();
            }
            TransportEvent::Message(raw) => match parse(raw) {
                Some(envelope) => self.feed.apply(&envelope),
                None => {
                    log::warn!("Failed to parse event data");
                    return;
                }
            },
            TransportEvent::Error(error) => {
                log::warn!("Transport error: {error}");
                self.last_error = Some(error);
                self.set_status(ConnectionStatus::Error);
            }
            TransportEvent::Close => {
                self.detach();
                self.schedule_retry();
            }
        }
        self.notify();
    }

    /// Hand out the most recently scheduled reconnect, once.
    pub fn take_scheduled_retry(&mut self) -> Option<ScheduledRetry> {
        self.scheduled_retry.take()
    }

    /// Run a scheduled reconnect, unless something has happened since that made it moot.
    pub fn retry(&mut self, ticket: RetryTicket) {
        if self.awaiting_retry != Some(ticket) {
            log::debug!("Ignoring superseded retry {ticket:?}");
            return;
        }
        self.open_connection();
        self.notify();
    }

    /// Send `{type, payload}` if the tracked connection is open. Otherwise do nothing.
    pub fn send(&self, message: &OutboundMessage) {
        sender::send(self.current.as_ref().map(|t| t.socket.as_ref()), message);
    }

    pub fn register_listener(
        &mut self,
        listener: impl FnMut(&SpectatorSnapshot) + Send + 'static,
    ) -> ListenerKey {
        self.listeners.insert(Box::new(listener))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key);
    }

    fn open_connection(&mut self) {
        self.awaiting_retry = None;
        self.scheduled_retry = None;

        let Some(debate_id) = self.debate_id.clone() else {
            return;
        };

        let spectator_id = storage::get_or_create_spectator_id(self.storage.as_mut());
        let url = match self.urls.debate_url(&debate_id, &spectator_id) {
            Ok(url) => url,
            Err(e) => {
                log::error!("Can't build a URL for debate {debate_id}: {e}");
                self.last_error = Some(e.to_string());
                self.set_status(ConnectionStatus::Disconnected);
                return;
            }
        };

        self.last_connection_id += 1;
        let id = ConnectionId(self.last_connection_id);
        self.set_status(if self.attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match self.connector.connect(id, &url, self.options.connection_timeout) {
            Ok(socket) => {
                log::info!("Opening {url} as {id:?}");
                self.current = Some(Tracked { id, socket });
            }
            Err(e) => {
                log::warn!("Couldn't start connecting to {url}: {e}");
                self.last_error = Some(e.to_string());
                self.schedule_retry();
            }
        }
    }

    /// Forget the tracked connection before closing it, so nothing it delivers afterwards
    /// matches. Also cancels any pending reconnect.
    fn detach(&mut self) {
        self.awaiting_retry = None;
        self.scheduled_retry = None;

        if let Some(Tracked { id, socket }) = self.current.take() {
            log::info!("Detaching from {id:?}");
            if matches!(
                socket.ready_state(),
                ReadyState::Open | ReadyState::Connecting
            ) {
                socket.close();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.attempt >= self.options.max_retries {
            log::warn!(
                "Giving up on debate {:?} after {} reconnect attempts",
                self.debate_id,
                self.attempt
            );
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        let delay = self.options.delay_for(self.attempt);
        self.attempt += 1;
        self.last_ticket += 1;
        let ticket = RetryTicket(self.last_ticket);
        self.awaiting_retry = Some(ticket);
        self.scheduled_retry = Some(ScheduledRetry { ticket, delay });
        log::info!(
            "Reconnecting in {delay:?} (attempt {}/{})",
            self.attempt,
            self.options.max_retries
        );
        self.set_status(ConnectionStatus::Reconnecting);
    }

    fn announce(&self) {
        let spectator_hash = self
            .spectator_hash
            .clone()
            .or_else(|| self.storage.get(SPECTATOR_HASH_KEY))
            .unwrap_or_default();
        self.send(&OutboundMessage::new(
            sender::JOIN,
            json!({ "spectatorHash": Value::String(spectator_hash) }),
        ));
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            log::info!("Connection status: {} -> {status}", self.status);
            self.status = status;
        }
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for listener in self.listeners.values_mut() {
            listener(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let options = ReconnectOptions::default();
        assert_eq!(options.delay_for(0), Duration::from_millis(2000));
        assert_eq!(options.delay_for(1).as_millis(), 2600);
        assert_eq!(options.delay_for(2).as_millis(), 3380);
        assert_eq!(options.delay_for(7), Duration::from_millis(10000));
        assert_eq!(options.delay_for(u32::MAX), Duration::from_millis(10000));
    }

    #[test]
    fn test_status_text() {
        let snapshot = SpectatorSnapshot {
            status: ConnectionStatus::Reconnecting,
            retry_count: 3,
            max_retries: 10,
            ..Default::default()
        };
        assert_eq!(snapshot.status_text(), "Reconnecting (3/10)...");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Reconnecting).unwrap(),
            json!("reconnecting")
        );
    }
}
