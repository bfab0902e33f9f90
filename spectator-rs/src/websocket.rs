//! WebSocket transport on top of tokio-tungstenite.
//!
//! Each socket is driven by its own task. The task forwards everything it sees to the delivery
//! channel until the socket is closed from our side, at which point it goes quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use debate_feed::RawMessage;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::TransportError;
use crate::transport::{ConnectionId, Connector, Delivery, ReadyState, Socket, TransportEvent};

pub struct TungsteniteConnector {
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl TungsteniteConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (deliveries, receiver) = mpsc::unbounded_channel();
        (Self { deliveries }, receiver)
    }
}

impl Connector for TungsteniteConnector {
    fn connect(
        &mut self,
        connection: ConnectionId,
        url: &Url,
        timeout: Duration,
    ) -> Result<Box<dyn Socket>, TransportError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let shared = Arc::new(Shared::default());
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let link = Link {
            connection,
            shared: shared.clone(),
            deliveries: self.deliveries.clone(),
        };
        runtime.spawn(drive(link, url.clone(), timeout, outgoing_rx));

        Ok(Box::new(TungsteniteSocket {
            url: url.clone(),
            shared,
            outgoing,
        }))
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct Shared {
    state: AtomicU8,
    detached: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(encode(ReadyState::Connecting)),
            detached: AtomicBool::new(false),
        }
    }
}

impl Shared {
    fn state(&self) -> ReadyState {
        decode(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(encode(state), Ordering::SeqCst);
    }

    /// Move from `from` to `to` only if nobody got there first.
    fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.state
            .compare_exchange(encode(from), encode(to), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

fn encode(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

fn decode(state: u8) -> ReadyState {
    match state {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

struct Link {
    connection: ConnectionId,
    shared: Arc<Shared>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl Link {
    fn deliver(&self, event: TransportEvent) {
        if self.shared.detached.load(Ordering::SeqCst) {
            return;
        }
        // The receiver only goes away when the client shuts down.
        let _ = self.deliveries.send(Delivery {
            connection: self.connection,
            event,
        });
    }

    fn fail(&self, error: TransportError) {
        self.shared.set_state(ReadyState::Closed);
        self.deliver(TransportEvent::Error(error.to_string()));
        self.deliver(TransportEvent::Close);
    }
}

async fn drive(
    link: Link,
    url: Url,
    timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut stream =
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                log::debug!("Connecting to {url} failed: {e}");
                link.fail(TransportError::Connect(e.to_string()));
                return;
            }
            Err(_) => {
                log::debug!("Connecting to {url} timed out");
                link.fail(TransportError::Timeout(timeout));
                return;
            }
        };

    if !link.shared.transition(ReadyState::Connecting, ReadyState::Open) {
        // Closed while we were still handshaking.
        let _ = stream.close(None).await;
        link.shared.set_state(ReadyState::Closed);
        return;
    }
    link.deliver(TransportEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        link.deliver(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    link.deliver(TransportEvent::Message(RawMessage::Text(text)));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    link.deliver(TransportEvent::Message(RawMessage::Binary(bytes)));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong
                Some(Err(e)) => {
                    link.deliver(TransportEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    link.shared.set_state(ReadyState::Closed);
    link.deliver(TransportEvent::Close);
}

struct TungsteniteSocket {
    url: Url,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Socket for TungsteniteSocket {
    fn url(&self) -> &Url {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.shared.state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.shared.detached.store(true, Ordering::SeqCst);
        if self.shared.transition(ReadyState::Connecting, ReadyState::Closing)
            || self.shared.transition(ReadyState::Open, ReadyState::Closing)
        {
            let _ = self.outgoing.send(Outgoing::Close);
        }
    }
}
