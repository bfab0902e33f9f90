//! An async front for [`ConnectionManager`].
//!
//! The manager lives on a single task. Host commands, socket deliveries and reconnect timers are
//! all funnelled into that task, so state is only ever touched from one place, one event at a
//! time. Hosts read state through a [`watch`] channel.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SpectatorConfig;
use crate::lifecycle::{ConnectionManager, SpectatorSnapshot};
use crate::sender::OutboundMessage;
use crate::storage;
use crate::transport::{Connector, Delivery};
use crate::websocket::TungsteniteConnector;

enum Command {
    Acquire(String),
    Release,
    Reconnect,
    Send(OutboundMessage),
    SetSpectatorHash(Option<String>),
}

pub struct SpectatorClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SpectatorSnapshot>,
    task: JoinHandle<()>,
}

impl SpectatorClient {
    /// Start a client that talks WebSocket. Must be called from within a tokio runtime.
    pub fn start(config: &SpectatorConfig) -> Self {
        let (connector, deliveries) = TungsteniteConnector::new();
        let manager = ConnectionManager::new(
            connector,
            config.urls.clone(),
            storage::open_store(config.state_dir.as_deref()),
            config.reconnect.clone(),
        );
        Self::spawn(manager, deliveries)
    }

    /// Run `manager` on its own task, feeding it `deliveries` from its connector.
    pub fn spawn<C: Connector + 'static>(
        mut manager: ConnectionManager<C>,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(manager.snapshot());
        manager.register_listener(move |snapshot| {
            state_tx.send_replace(snapshot.clone());
        });

        let task = tokio::spawn(run(manager, command_rx, deliveries));
        Self {
            commands,
            state,
            task,
        }
    }

    pub fn watch(&self) -> watch::Receiver<SpectatorSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SpectatorSnapshot {
        self.state.borrow().clone()
    }

    pub fn acquire(&self, debate_id: impl Into<String>) {
        self.command(Command::Acquire(debate_id.into()));
    }

    pub fn release(&self) {
        self.command(Command::Release);
    }

    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    pub fn set_spectator_hash(&self, spectator_hash: Option<String>) {
        self.command(Command::SetSpectatorHash(spectator_hash));
    }

    pub fn send_message(&self, kind: impl Into<String>, payload: Value) {
        self.command(Command::Send(OutboundMessage::new(kind, payload)));
    }

    pub fn vote(&self, poll_id: &str, option: &str) {
        self.command(Command::Send(OutboundMessage::vote(poll_id, option)));
    }

    pub fn ask(&self, text: &str) {
        self.command(Command::Send(OutboundMessage::question(text)));
    }

    pub fn react(&self, reaction: &str) {
        self.command(Command::Send(OutboundMessage::reaction(reaction)));
    }

    /// Release the connection and wait for the task to finish.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            log::error!("Spectator task failed: {e}");
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("Spectator task is gone, dropping command");
        }
    }
}

async fn run<C: Connector>(
    mut manager: ConnectionManager<C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    let retry_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry_timer);
    let mut armed = None;

    loop {
        if let Some(scheduled) = manager.take_scheduled_retry() {
            retry_timer.as_mut().reset(Instant::now() + scheduled.delay);
            armed = Some(scheduled.ticket);
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Acquire(debate_id)) => manager.acquire(&debate_id),
                Some(Command::Release) => manager.release(),
                Some(Command::Reconnect) => manager.reconnect(),
                Some(Command::Send(message)) => manager.send(&message),
                Some(Command::SetSpectatorHash(hash)) => manager.set_spectator_hash(hash),
                None => break,
            },
            Some(delivery) = deliveries.recv() => manager.handle(delivery),
            () = &mut retry_timer, if armed.is_some() => {
                if let Some(ticket) = armed.take() {
                    manager.retry(ticket);
                }
            }
        }
    }

    manager.release();
}
