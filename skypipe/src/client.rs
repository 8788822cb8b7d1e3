//! Client side of the relay
//!
//! `Connection` speaks the request/reply protocol over TCP. On top of it,
//! the two modes of the command line tool:
//! - input mode: publish one chunk and wait for the ACK
//! - output mode: listen, take the first DATA, unlisten

use futures::stream::{self, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::envelope::{Command, EnvelopeCodec, ProtocolError, Reply, Request};
use crate::pipe::{Chunk, PipeName};
use crate::wire::{read_message, write_message, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply { expected: Command, got: Command },

    #[error("broker closed the connection")]
    Disconnected,
}

/// An open connection to a broker
pub struct Connection {
    stream: TcpStream,
    codec: EnvelopeCodec,
    max_message_size: usize,
}

impl Connection {
    /// Connect to the broker named in `config`
    ///
    /// # Errors
    /// Returns `ClientError::Connect` if the broker is unreachable.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&config.address)
            .await
            .map_err(|source| ClientError::Connect {
                address: config.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(WireError::from)?;
        debug!(address = %config.address, "connected");
        Ok(Self {
            stream,
            codec: EnvelopeCodec::new(&config.protocol_tag),
            max_message_size: config.max_message_size,
        })
    }

    /// Send a request without waiting for the reply
    ///
    /// # Errors
    /// Returns an error on transport failure.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        trace!(command = %request.command(), "send");
        let message = self.codec.encode_request(request);
        write_message(&mut self.stream, &message).await?;
        Ok(())
    }

    /// Wait for the next reply
    ///
    /// # Errors
    /// Returns `ClientError::Disconnected` when the broker closed the
    /// connection, or a transport/protocol error.
    pub async fn recv(&mut self) -> Result<Reply, ClientError> {
        let message = read_message(&mut self.stream, self.max_message_size)
            .await?
            .ok_or(ClientError::Disconnected)?;
        let reply = self.codec.decode_reply(&message)?;
        trace!(command = %reply.command(), "recv");
        Ok(reply)
    }

    /// Send a request and wait for the next reply
    ///
    /// # Errors
    /// See `send` and `recv`.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, ClientError> {
        self.send(request).await?;
        self.recv().await
    }

    /// Replies as a stream
    ///
    /// The stream ends when the broker disconnects, or right after yielding
    /// the first error.
    pub fn replies(&mut self) -> impl Stream<Item = Result<Reply, ClientError>> + '_ {
        stream::unfold(Some(self), |state| async move {
            let conn = state?;
            match conn.recv().await {
                Ok(reply) => Some((Ok(reply), Some(conn))),
                Err(ClientError::Disconnected) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Close the connection, flushing what was sent
    ///
    /// # Errors
    /// Returns an error if the shutdown fails.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await.map_err(WireError::from)?;
        Ok(())
    }
}

/// Input mode: publish `data` on `pipe` as one chunk
///
/// # Errors
/// Fails on transport errors or if the broker answers with anything but ACK.
pub async fn send_input(
    conn: &mut Connection,
    pipe: &PipeName,
    data: Chunk,
) -> Result<(), ClientError> {
    debug!(pipe = %pipe, bytes = data.len(), "publishing");
    let request = Request::Data {
        pipe: pipe.clone(),
        chunk: data,
    };
    match conn.request(&request).await? {
        Reply::Ack => Ok(()),
        other => Err(ClientError::UnexpectedReply {
            expected: Command::Ack,
            got: other.command(),
        }),
    }
}

/// Output mode: wait for one chunk on `pipe`
///
/// Greets the broker, listens, returns the first DATA received and
/// unlistens before returning.
///
/// # Errors
/// Fails on transport errors, on a wrong greeting and if the broker
/// disconnects before delivering.
pub async fn receive_output(conn: &mut Connection, pipe: &PipeName) -> Result<Chunk, ClientError> {
    match conn.request(&Request::Hello).await? {
        Reply::Hello => {}
        other => {
            return Err(ClientError::UnexpectedReply {
                expected: Command::Hello,
                got: other.command(),
            })
        }
    }

    conn.send(&Request::Listen(pipe.clone())).await?;
    let chunk = {
        let replies = conn.replies();
        futures::pin_mut!(replies);
        loop {
            match replies.next().await {
                Some(Ok(Reply::Data { chunk, .. })) => break chunk,
                Some(Ok(reply)) => debug!(command = %reply.command(), "waiting for data"),
                Some(Err(e)) => return Err(e),
                None => return Err(ClientError::Disconnected),
            }
        }
    };
    debug!(pipe = %pipe, bytes = chunk.len(), "received");

    // Data broadcast between our LISTEN and UNLISTEN is discarded
    conn.send(&Request::Unlisten(pipe.clone())).await?;
    loop {
        match conn.recv().await? {
            Reply::Ack => break,
            reply => trace!(command = %reply.command(), "skipping reply while unlistening"),
        }
    }
    Ok(chunk)
}
