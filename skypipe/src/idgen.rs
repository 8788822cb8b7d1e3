use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Opaque, transport-assigned identity of a connected client
///
/// The core never looks inside the bytes; it only compares and hashes them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Bytes);

impl ClientId {
    #[must_use]
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", hex::encode(&self.0))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl From<&'static str> for ClientId {
    fn from(id: &'static str) -> Self {
        Self(Bytes::from_static(id.as_bytes()))
    }
}

/// Thread-safe ID generator
///
/// Identities are 8-byte big-endian counters, unique for the lifetime of
/// the generator.
#[derive(Debug)]
pub struct IdGen {
    next_id: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the next unique client identity
    pub fn next_client(&self) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ClientId(Bytes::copy_from_slice(&id.to_be_bytes()))
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
