//! Capability to receive messages
//!
//! The dispatcher never talks to sockets. Each connected client is
//! represented by something implementing `Deliverable`; sending only
//! enqueues the message, the transport writes it out on its own task.

use tokio::sync::mpsc;

use crate::envelope::Message;
use crate::idgen::ClientId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("client {0} is not connected")]
    NotConnected(ClientId),

    #[error("client {0} went away")]
    Closed(ClientId),
}

/// Anything that can receive a message
///
/// Implementations must not block: `send` is called while a broker
/// dispatch is in progress.
pub trait Deliverable: Send + Sync {
    /// Hand a message over for delivery
    ///
    /// # Errors
    /// Returns an error if the receiving side is gone.
    fn send(&self, message: Message) -> Result<(), DeliveryError>;
}

/// Outbound queue of one connection
///
/// The matching receiver is drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct Outbox {
    client: ClientId,
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbox {
    #[must_use]
    pub fn new(client: ClientId) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { client, tx }, rx)
    }
}

impl Deliverable for Outbox {
    fn send(&self, message: Message) -> Result<(), DeliveryError> {
        self.tx
            .send(message)
            .map_err(|_| DeliveryError::Closed(self.client.clone()))
    }
}
