//! Named pipe state held by the broker
//!
//! A pipe is the pair of:
//! - the set of clients currently listening on it
//! - a FIFO of chunks published while nobody was listening
//!
//! Pipes carry no behaviour of their own beyond keeping these two
//! collections consistent; routing decisions live in `crate::registry`.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use bytes::Bytes;

use crate::envelope::ProtocolError;
use crate::idgen::ClientId;

/// One DATA payload. Cloning is cheap, fan-out shares the allocation.
pub type Chunk = Bytes;

/// Non-empty pipe identifier, matched exactly
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeName(String);

impl PipeName {
    /// Validate and wrap a pipe name
    ///
    /// # Errors
    /// Returns `ProtocolError::EmptyPipeName` for an empty string.
    pub fn new(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProtocolError::EmptyPipeName);
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listener set and pending queue of one pipe
#[derive(Default)]
pub struct Pipe {
    listeners: HashSet<ClientId>,
    pending: VecDeque<Chunk>,
}

impl Pipe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns `false` if it was already registered.
    pub fn add_listener(&mut self, client: ClientId) -> bool {
        self.listeners.insert(client)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, client: &ClientId) -> bool {
        self.listeners.remove(client)
    }

    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    #[must_use]
    pub fn is_listening(&self, client: &ClientId) -> bool {
        self.listeners.contains(client)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &ClientId> {
        self.listeners.iter()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Queue a chunk for a future listener
    pub fn push_pending(&mut self, chunk: Chunk) {
        self.pending.push_back(chunk);
    }

    /// Take the oldest pending chunk
    pub fn pop_pending(&mut self) -> Option<Chunk> {
        self.pending.pop_front()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Chunk> {
        self.pending.iter()
    }

    /// A pipe with neither listeners nor pending data is indistinguishable
    /// from one that was never referenced.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.listeners.is_empty() && self.pending.is_empty()
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipe(listeners={}, pending={})",
            self.listeners.len(),
            self.pending.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pipe_name_is_rejected() {
        assert!(matches!(PipeName::new(""), Err(ProtocolError::EmptyPipeName)));
        assert_eq!(PipeName::new("chat").unwrap().as_str(), "chat");
    }

    #[test]
    fn test_pipe_names_are_not_normalized() {
        let a = PipeName::new("Chat").unwrap();
        let b = PipeName::new("chat").unwrap();
        let c = PipeName::new("chat ").unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_pending_is_fifo() {
        let mut pipe = Pipe::new();
        pipe.push_pending(Chunk::from_static(b"one"));
        pipe.push_pending(Chunk::from_static(b"two"));

        assert_eq!(pipe.pop_pending().unwrap(), "one");
        assert_eq!(pipe.pop_pending().unwrap(), "two");
        assert!(pipe.pop_pending().is_none());
        assert!(pipe.is_idle());
    }

    #[test]
    fn test_listener_add_is_idempotent() {
        let mut pipe = Pipe::new();
        assert!(pipe.add_listener(ClientId::from("c1")));
        assert!(!pipe.add_listener(ClientId::from("c1")));
        assert_eq!(pipe.listener_count(), 1);
        assert!(pipe.remove_listener(&ClientId::from("c1")));
        assert!(!pipe.remove_listener(&ClientId::from("c1")));
    }
}
