//! Dispatcher - turns decoded requests into registry calls and replies
//!
//! | request           | registry call | replies                                   |
//! |-------------------|---------------|-------------------------------------------|
//! | `HELLO`           | -             | `HELLO` to sender                         |
//! | `LISTEN pipe`     | `listen`      | `DATA` (buffered chunk) or `ACK` to sender |
//! | `UNLISTEN pipe`   | `unlisten`    | `ACK` to sender                           |
//! | `DATA pipe chunk` | `publish`     | `DATA` to each listener, then `ACK` to sender |
//!
//! Every delivery is independent: a failed send is logged and counted,
//! the remaining recipients are still served.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::deliverable::{Deliverable, DeliveryError};
use crate::envelope::{Envelope, EnvelopeCodec, Message, Reply, Request};
use crate::idgen::ClientId;
use crate::pipe::PipeName;
use crate::registry::{DeliveryAction, PipeRegistry};

/// Outcome of one dispatch, counted per recipient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    registry: Arc<PipeRegistry>,
    codec: EnvelopeCodec,
    clients: HashMap<ClientId, Arc<dyn Deliverable>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<PipeRegistry>, codec: EnvelopeCodec) -> Self {
        Self {
            registry,
            codec,
            clients: HashMap::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PipeRegistry> {
        &self.registry
    }

    /// Make `client` reachable through `deliverable`
    pub fn connect(&mut self, client: ClientId, deliverable: Arc<dyn Deliverable>) {
        if self.clients.insert(client.clone(), deliverable).is_some() {
            warn!(client = %client, "client connected twice, replacing its outbox");
        }
    }

    /// Forget `client` and evict it from every pipe it listens on
    ///
    /// Returns the number of pipes it was evicted from.
    pub fn disconnect(&mut self, client: &ClientId) -> usize {
        self.clients.remove(client);
        let evicted = self.registry.forget_client(client);
        if evicted > 0 {
            debug!(client = %client, pipes = evicted, "evicted disconnected listener");
        }
        evicted
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Decode and dispatch a raw message from `client`
    ///
    /// Malformed messages are logged and dropped; `None` is returned.
    pub fn handle_message(&self, client: ClientId, message: &Message) -> Option<DispatchReport> {
        match self.codec.decode_request(client.clone(), message) {
            Ok(envelope) => Some(self.dispatch(&envelope)),
            Err(e) => {
                warn!(client = %client, error = %e, "dropping malformed message");
                None
            }
        }
    }

    /// Dispatch one decoded request
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        let client = &envelope.client;
        let mut report = DispatchReport::default();
        debug!(
            client = %client,
            command = %envelope.command(),
            pipe = ?envelope.pipe(),
            "dispatch"
        );

        match &envelope.request {
            Request::Hello => self.reply(client, &Reply::Hello, &mut report),
            Request::Listen(pipe) => {
                let action = self.registry.listen(pipe, client);
                self.perform(client, pipe, action, &mut report);
            }
            Request::Unlisten(pipe) => {
                let action = self.registry.unlisten(pipe, client);
                self.perform(client, pipe, action, &mut report);
            }
            Request::Data { pipe, chunk } => {
                let action = self.registry.publish(pipe, chunk.clone());
                self.perform(client, pipe, action, &mut report);
            }
        }
        report
    }

    /// Carry out a registry decision on behalf of `requester`
    fn perform(
        &self,
        requester: &ClientId,
        pipe: &PipeName,
        action: DeliveryAction,
        report: &mut DispatchReport,
    ) {
        match action {
            DeliveryAction::Acknowledge => self.reply(requester, &Reply::Ack, report),
            DeliveryAction::DeliverChunk(chunk) => {
                let reply = Reply::Data {
                    pipe: pipe.clone(),
                    chunk,
                };
                self.reply(requester, &reply, report);
            }
            DeliveryAction::Broadcast { chunk, listeners } => {
                trace!(pipe = %pipe, listeners = listeners.len(), bytes = chunk.len(), "broadcast");
                let message = self.codec.encode_reply(&Reply::Data {
                    pipe: pipe.clone(),
                    chunk,
                });
                for listener in &listeners {
                    self.send(listener, message.clone(), report);
                }
                self.reply(requester, &Reply::Ack, report);
            }
        }
    }

    fn reply(&self, client: &ClientId, reply: &Reply, report: &mut DispatchReport) {
        self.send(client, self.codec.encode_reply(reply), report);
    }

    fn send(&self, client: &ClientId, message: Message, report: &mut DispatchReport) {
        let sent = match self.clients.get(client) {
            Some(deliverable) => deliverable.send(message),
            None => Err(DeliveryError::NotConnected(client.clone())),
        };
        match sent {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(client = %client, error = %e, "delivery failed");
                report.failed += 1;
            }
        }
    }
}
