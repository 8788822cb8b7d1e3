//! Connection event monitor
//!
//! The transport reports connection lifecycle events to an independent
//! task over a bounded channel. Reporting never waits: when the channel is
//! full the event is dropped. The monitor keeps its own counters and shares
//! nothing with the registry.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::idgen::ClientId;

/// Default capacity of the event channel
pub const DEFAULT_MONITOR_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Accepted { client: ClientId, peer: SocketAddr },
    Closed { client: ClientId },
    Fault { client: ClientId, error: String },
}

/// Counters collected by the monitor task over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub accepted: u64,
    pub closed: u64,
    pub faults: u64,
}

/// Producer side, cloned into every connection task
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<ConnectionEvent>,
}

impl MonitorHandle {
    /// Report an event without waiting
    pub fn report(&self, event: ConnectionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(event = ?e.into_inner(), "monitor channel unavailable, event dropped");
        }
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

/// Spawn the monitor task
///
/// The task ends once every `MonitorHandle` is dropped and returns the
/// collected counters.
#[must_use]
pub fn spawn_monitor(capacity: usize) -> (MonitorHandle, JoinHandle<MonitorStats>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_monitor(rx));
    (MonitorHandle { tx }, task)
}

async fn run_monitor(mut rx: mpsc::Receiver<ConnectionEvent>) -> MonitorStats {
    let mut stats = MonitorStats::default();
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Accepted { client, peer } => {
                stats.accepted += 1;
                info!(client = %client, peer = %peer, "client connected");
            }
            ConnectionEvent::Closed { client } => {
                stats.closed += 1;
                info!(client = %client, "client disconnected");
            }
            ConnectionEvent::Fault { client, error } => {
                stats.faults += 1;
                warn!(client = %client, error = %error, "connection fault");
            }
        }
    }
    debug!(?stats, "monitor stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_counts_events() {
        let (handle, task) = spawn_monitor(8);
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        handle.report(ConnectionEvent::Accepted {
            client: ClientId::from("a"),
            peer,
        });
        handle.report(ConnectionEvent::Fault {
            client: ClientId::from("a"),
            error: "reset".to_string(),
        });
        handle.report(ConnectionEvent::Closed {
            client: ClientId::from("a"),
        });
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(
            stats,
            MonitorStats {
                accepted: 1,
                closed: 1,
                faults: 1,
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (handle, task) = spawn_monitor(1);

        // The monitor task cannot run before we yield, so only the first
        // event fits into the channel.
        for _ in 0..5 {
            handle.report(ConnectionEvent::Closed {
                client: ClientId::from("a"),
            });
        }
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.closed, 1);
    }
}
