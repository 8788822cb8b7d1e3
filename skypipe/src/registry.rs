//! PipeRegistry - routing and buffering state of the broker
//!
//! Maps pipe names to their listener sets and pending chunks, and decides
//! for every LISTEN and DATA whether data goes out now or waits.
//!
//! # Atomicity
//!
//! The whole map sits behind one `parking_lot::Mutex`. Every public method
//! takes the lock exactly once, so decisions like "this is the first
//! listener, release a pending chunk" are made atomically with the
//! listener-set mutation: two concurrent `listen` calls can never both
//! observe an empty listener set.
//!
//! # Pending chunk release
//!
//! A `listen` that makes a pipe go from zero listeners to one releases
//! exactly one pending chunk, the oldest. The rest of the backlog stays
//! queued until the pipe goes quiet and another first listener arrives.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::idgen::ClientId;
use crate::pipe::{Chunk, Pipe, PipeName};

/// What the caller has to send as a result of a registry operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Nothing to forward; reply ACK to the requester
    Acknowledge,
    /// Send this previously buffered chunk to the requester
    DeliverChunk(Chunk),
    /// Send the chunk to every listed client, independently of each other
    Broadcast {
        chunk: Chunk,
        listeners: Vec<ClientId>,
    },
}

/// Snapshot of registry size, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pipes: usize,
    pub listeners: usize,
    pub pending_chunks: usize,
    pub pending_bytes: usize,
}

/// Registry of named pipes
///
/// Uses interior mutability via `Mutex` to allow shared access through
/// `Arc<PipeRegistry>`.
#[derive(Default)]
pub struct PipeRegistry {
    pipes: Mutex<HashMap<PipeName, Pipe>>,
}

impl PipeRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` as a listener of `pipe`
    ///
    /// Idempotent. If the pipe had no listeners before the call, the oldest
    /// pending chunk (if any) is handed back for delivery to `client`.
    pub fn listen(&self, pipe: &PipeName, client: &ClientId) -> DeliveryAction {
        let mut pipes = self.pipes.lock();
        let entry = pipes.entry(pipe.clone()).or_default();

        let was_empty = !entry.has_listeners();
        if !entry.add_listener(client.clone()) {
            log::debug!("registry.listen: {client} already listens on {pipe}");
        }

        if was_empty {
            if let Some(chunk) = entry.pop_pending() {
                log::debug!(
                    "registry.listen: releasing {} bytes on {pipe} to {client} ({} left)",
                    chunk.len(),
                    entry.pending_len()
                );
                return DeliveryAction::DeliverChunk(chunk);
            }
        }
        DeliveryAction::Acknowledge
    }

    /// Remove `client` from the listeners of `pipe`
    ///
    /// Removing a client that is not listening is a no-op, not an error.
    pub fn unlisten(&self, pipe: &PipeName, client: &ClientId) -> DeliveryAction {
        let mut pipes = self.pipes.lock();
        if let Some(entry) = pipes.get_mut(pipe) {
            if !entry.remove_listener(client) {
                log::debug!("registry.unlisten: {client} was not listening on {pipe}");
            }
            if entry.is_idle() {
                pipes.remove(pipe);
            }
        }
        DeliveryAction::Acknowledge
    }

    /// Publish a chunk on `pipe`
    ///
    /// With listeners present the chunk fans out to a snapshot of them and
    /// is not queued. Without listeners it is appended to the pending queue.
    pub fn publish(&self, pipe: &PipeName, chunk: Chunk) -> DeliveryAction {
        let mut pipes = self.pipes.lock();
        let entry = pipes.entry(pipe.clone()).or_default();

        if entry.has_listeners() {
            let listeners: Vec<ClientId> = entry.listeners().cloned().collect();
            return DeliveryAction::Broadcast { chunk, listeners };
        }

        log::debug!(
            "registry.publish: no listeners on {pipe}, buffering {} bytes",
            chunk.len()
        );
        entry.push_pending(chunk);
        DeliveryAction::Acknowledge
    }

    /// Drop `client` from every listener set
    ///
    /// Returns the number of pipes it was listening on.
    pub fn forget_client(&self, client: &ClientId) -> usize {
        let mut pipes = self.pipes.lock();
        let mut removed = 0;
        pipes.retain(|_, entry| {
            if entry.remove_listener(client) {
                removed += 1;
            }
            !entry.is_idle()
        });
        removed
    }

    /// Current listeners of `pipe`, in no particular order
    #[must_use]
    pub fn listeners(&self, pipe: &PipeName) -> Vec<ClientId> {
        self.pipes
            .lock()
            .get(pipe)
            .map(|entry| entry.listeners().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if `client` listens on `pipe`
    #[must_use]
    pub fn is_listening(&self, pipe: &PipeName, client: &ClientId) -> bool {
        self.pipes
            .lock()
            .get(pipe)
            .is_some_and(|entry| entry.is_listening(client))
    }

    /// Number of chunks waiting on `pipe`
    #[must_use]
    pub fn pending_len(&self, pipe: &PipeName) -> usize {
        self.pipes.lock().get(pipe).map_or(0, Pipe::pending_len)
    }

    /// Copy of the chunks waiting on `pipe`, oldest first
    #[must_use]
    pub fn pending(&self, pipe: &PipeName) -> Vec<Chunk> {
        self.pipes
            .lock()
            .get(pipe)
            .map(|entry| entry.pending().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of pipes that are not idle
    #[must_use]
    pub fn pipe_count(&self) -> usize {
        self.pipes
            .lock()
            .values()
            .filter(|entry| !entry.is_idle())
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let pipes = self.pipes.lock();
        pipes
            .values()
            .fold(RegistryStats::default(), |mut stats, entry| {
                if !entry.is_idle() {
                    stats.pipes += 1;
                }
                stats.listeners += entry.listener_count();
                stats.pending_chunks += entry.pending_len();
                stats.pending_bytes += entry.pending().map(Chunk::len).sum::<usize>();
                stats
            })
    }
}
