//! TCP front end of the broker
//!
//! One accept loop, and per connection:
//! - a reader loop decoding messages and forwarding them to the broker
//! - a writer task draining the connection's `Outbox`
//!
//! Transport faults end only the affected connection; the broker is told
//! the client is gone and evicts it from every pipe.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerEvent, BrokerSender};
use crate::config::ServerConfig;
use crate::deliverable::Outbox;
use crate::envelope::EnvelopeCodec;
use crate::idgen::{ClientId, IdGen};
use crate::monitor::{spawn_monitor, ConnectionEvent, MonitorHandle, MonitorStats};
use crate::registry::{PipeRegistry, RegistryStats};
use crate::wire::{read_message, write_message, WireError};

/// Pause after a failed `accept`, so persistent errors like EMFILE do not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Final numbers of a server run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerReport {
    pub registry: RegistryStats,
    pub connections: MonitorStats,
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<PipeRegistry>,
    id_gen: IdGen,
}

impl Server {
    /// Bind the listening socket
    ///
    /// # Errors
    /// Fails if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            config,
            registry: Arc::new(PipeRegistry::new()),
            id_gen: IdGen::new(),
        })
    }

    /// Address actually bound, useful with port 0
    ///
    /// # Errors
    /// Propagates the socket error.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<PipeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept and serve connections until `shutdown` resolves
    ///
    /// On shutdown the accept loop stops, open connections are dropped and
    /// the broker loop ends.
    pub async fn run<F>(self, shutdown: F) -> ServerReport
    where
        F: Future<Output = ()>,
    {
        let codec = EnvelopeCodec::new(&self.config.protocol_tag);
        let broker = Broker::new(Arc::clone(&self.registry), codec, self.config.stats_interval);
        let events = broker.sender();
        let (stop_broker, broker_stopped) = oneshot::channel::<()>();
        let broker_task = tokio::spawn(broker.run(async move {
            let _ = broker_stopped.await;
        }));

        let (monitor, monitor_task) = spawn_monitor(self.config.monitor_capacity);
        let mut connections = JoinSet::new();

        match self.listener.local_addr() {
            Ok(addr) => info!(
                addr = %addr,
                tag = %self.config.protocol_tag,
                "skypipe broker listening"
            ),
            Err(e) => warn!(error = %e, "cannot determine listening address"),
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, closing listener");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let client = self.id_gen.next_client();
                            debug!(client = %client, peer = %peer, "accepted");
                            connections.spawn(serve_connection(
                                stream,
                                peer,
                                client,
                                events.clone(),
                                monitor.clone(),
                                self.config.max_message_size,
                            ));
                        }
                        Err(e) => accept_failed(&e).await,
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        connections.shutdown().await;
        drop(events);
        drop(monitor);

        let _ = stop_broker.send(());
        let registry = match broker_task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "broker task failed");
                self.registry.stats()
            }
        };
        let connections = monitor_task.await.unwrap_or_else(|e| {
            warn!(error = %e, "monitor task failed");
            MonitorStats::default()
        });

        ServerReport {
            registry,
            connections,
        }
    }
}

async fn accept_failed(error: &std::io::Error) {
    warn!(error = %error, "accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    client: ClientId,
    events: BrokerSender,
    monitor: MonitorHandle,
    max_message_size: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %client, error = %e, "cannot set TCP_NODELAY");
    }
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut outbox_rx) = Outbox::new(client.clone());

    let connected = BrokerEvent::Connected {
        client: client.clone(),
        outbox: Arc::new(outbox),
    };
    if events.send(connected).is_err() {
        debug!(client = %client, "broker gone, dropping connection");
        return;
    }
    monitor.report(ConnectionEvent::Accepted {
        client: client.clone(),
        peer,
    });

    // Ends when the broker drops the outbox, after the queue is drained
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            write_message(&mut writer, &message).await?;
        }
        Ok::<(), WireError>(())
    });

    let read_result = loop {
        match read_message(&mut reader, max_message_size).await {
            Ok(Some(message)) => {
                let event = BrokerEvent::Message {
                    client: client.clone(),
                    message,
                };
                if events.send(event).is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    let _ = events.send(BrokerEvent::Disconnected {
        client: client.clone(),
    });

    let write_result = match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            warn!(client = %client, error = %e, "writer task failed");
            Ok(())
        }
    };

    match read_result.and(write_result) {
        Ok(()) => monitor.report(ConnectionEvent::Closed { client }),
        Err(e) => monitor.report(ConnectionEvent::Fault {
            client,
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_failed_accept_backs_off() {
        let error = std::io::Error::from_raw_os_error(24);
        let start = tokio::time::Instant::now();

        accept_failed(&error).await;

        assert!(start.elapsed() >= ACCEPT_BACKOFF);
    }
}
