//! Client side of a live debate spectator feed.
//!
//! [`SpectatorClient`] is the entry point for async hosts: hand it a debate id and watch the
//! reconciled state. [`ConnectionManager`] is the same machinery without a runtime, for hosts that
//! want to drive the transport and timers themselves.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod sender;
pub mod storage;
pub mod transport;
pub mod websocket;
pub mod ws_url;

use std::sync::LazyLock;

pub use client::SpectatorClient;
pub use config::SpectatorConfig;
pub use debate_feed::{FeedState, Poll, Question, Reaction};
pub use error::{ConfigError, StorageError, TransportError, UrlError};
pub use lifecycle::{
    ConnectionManager, ConnectionStatus, ListenerKey, ReconnectOptions, SpectatorSnapshot,
};
pub use sender::OutboundMessage;
pub use ws_url::WsUrlBuilder;

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_ok() {
        log::info!("Logging initialized");
    }
});

pub fn init_logging() {
    LazyLock::force(&LOGGER);
}
