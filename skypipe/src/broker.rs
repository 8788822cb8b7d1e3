//! Broker event loop
//!
//! All dispatches are serialized through one unbounded mpsc channel: a
//! request is fully dispatched (registry mutation and every reply queued)
//! before the next event is taken. Connection tasks only ever hold the
//! sending side.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::deliverable::Deliverable;
use crate::dispatcher::Dispatcher;
use crate::envelope::{EnvelopeCodec, Message};
use crate::idgen::ClientId;
use crate::registry::{PipeRegistry, RegistryStats};

/// Events sent from connection tasks to the broker
pub enum BrokerEvent {
    /// A client is reachable through `outbox`
    Connected {
        client: ClientId,
        outbox: Arc<dyn Deliverable>,
    },
    /// A raw message arrived from `client`
    Message { client: ClientId, message: Message },
    /// The transport lost `client`
    Disconnected { client: ClientId },
}

/// Sending side of the broker's event channel
pub type BrokerSender = mpsc::UnboundedSender<BrokerEvent>;

pub struct Broker {
    dispatcher: Dispatcher,
    events_tx: BrokerSender,
    events_rx: mpsc::UnboundedReceiver<BrokerEvent>,
    stats_interval: Duration,
}

impl Broker {
    #[must_use]
    pub fn new(
        registry: Arc<PipeRegistry>,
        codec: EnvelopeCodec,
        stats_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher: Dispatcher::new(registry, codec),
            events_tx,
            events_rx,
            stats_interval,
        }
    }

    /// Get a sender for connection tasks
    #[must_use]
    pub fn sender(&self) -> BrokerSender {
        self.events_tx.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PipeRegistry> {
        self.dispatcher.registry()
    }

    /// Main event loop
    ///
    /// Runs until `shutdown` resolves or every sender is gone. Returns the
    /// registry stats at exit.
    pub async fn run<F>(self, shutdown: F) -> RegistryStats
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut dispatcher,
            events_tx,
            mut events_rx,
            stats_interval,
        } = self;
        // Drop our copy of the sender so the loop ends when all connections do
        drop(events_tx);

        let mut ticker = tokio::time::interval(stats_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("shutdown requested, broker stopping");
                    break;
                }

                event = events_rx.recv() => {
                    if let Some(event) = event {
                        handle_event(&mut dispatcher, event);
                    } else {
                        debug!("event channel closed");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let stats = dispatcher.registry().stats();
                    debug!(
                        clients = dispatcher.client_count(),
                        pipes = stats.pipes,
                        listeners = stats.listeners,
                        pending_chunks = stats.pending_chunks,
                        pending_bytes = stats.pending_bytes,
                        "registry stats"
                    );
                }
            }
        }

        dispatcher.registry().stats()
    }
}

fn handle_event(dispatcher: &mut Dispatcher, event: BrokerEvent) {
    match event {
        BrokerEvent::Connected { client, outbox } => {
            trace!(client = %client, "registering outbox");
            dispatcher.connect(client, outbox);
        }
        BrokerEvent::Message { client, message } => {
            if let Some(report) = dispatcher.handle_message(client, &message) {
                trace!(delivered = report.delivered, failed = report.failed, "dispatched");
            }
        }
        BrokerEvent::Disconnected { client } => {
            dispatcher.disconnect(&client);
        }
    }
}
