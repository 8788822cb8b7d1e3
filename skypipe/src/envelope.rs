//! Envelope codec
//!
//! Converts between multipart wire messages and typed requests/replies.
//!
//! ```text
//! request:  [tag, HELLO]
//!           [tag, LISTEN,   pipe]
//!           [tag, UNLISTEN, pipe]
//!           [tag, DATA,     pipe, payload]
//! reply:    [tag, HELLO]
//!           [tag, ACK]
//!           [tag, DATA,     pipe, payload]
//! ```
//!
//! The sender identity is not on the wire; the transport attaches it when a
//! request is decoded. Frames after the ones a command uses are ignored.

use std::fmt;

use bytes::Bytes;

use crate::idgen::ClientId;
use crate::pipe::{Chunk, PipeName};

/// Protocol version literal carried by every message
pub const PROTOCOL_TAG: &str = "SKYPIPE/0.2";

/// A message as it travels on the wire: an ordered list of frames
pub type Message = Vec<Bytes>;

/// Malformed or unsupported messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("protocol tag mismatch: expected {expected:?}, got {got:?}")]
    TagMismatch { expected: String, got: String },

    #[error("missing command frame")]
    MissingCommand,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("{0} is not valid in this direction")]
    UnexpectedCommand(Command),

    #[error("{0} requires a pipe name")]
    MissingPipeName(Command),

    #[error("DATA requires a payload")]
    MissingPayload,

    #[error("pipe name must not be empty")]
    EmptyPipeName,

    #[error("pipe name is not valid UTF-8")]
    InvalidPipeName,
}

/// Protocol verbs, in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Hello,
    Listen,
    Unlisten,
    Data,
    Ack,
}

impl Command {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Listen => "LISTEN",
            Self::Unlisten => "UNLISTEN",
            Self::Data => "DATA",
            Self::Ack => "ACK",
        }
    }

    /// Parse a command frame (exact, case-sensitive match)
    #[must_use]
    pub fn parse(frame: &[u8]) -> Option<Self> {
        match frame {
            b"HELLO" => Some(Self::Hello),
            b"LISTEN" => Some(Self::Listen),
            b"UNLISTEN" => Some(Self::Unlisten),
            b"DATA" => Some(Self::Data),
            b"ACK" => Some(Self::Ack),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-to-broker request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello,
    Listen(PipeName),
    Unlisten(PipeName),
    Data { pipe: PipeName, chunk: Chunk },
}

impl Request {
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Hello => Command::Hello,
            Self::Listen(_) => Command::Listen,
            Self::Unlisten(_) => Command::Unlisten,
            Self::Data { .. } => Command::Data,
        }
    }

    #[must_use]
    pub fn pipe(&self) -> Option<&PipeName> {
        match self {
            Self::Hello => None,
            Self::Listen(pipe) | Self::Unlisten(pipe) | Self::Data { pipe, .. } => Some(pipe),
        }
    }
}

/// Broker-to-client reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Hello,
    Ack,
    Data { pipe: PipeName, chunk: Chunk },
}

impl Reply {
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Hello => Command::Hello,
            Self::Ack => Command::Ack,
            Self::Data { .. } => Command::Data,
        }
    }
}

/// A decoded request together with the identity of its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub client: ClientId,
    pub request: Request,
}

impl Envelope {
    #[must_use]
    pub fn new(client: ClientId, request: Request) -> Self {
        Self { client, request }
    }

    #[must_use]
    pub fn command(&self) -> Command {
        self.request.command()
    }

    #[must_use]
    pub fn pipe(&self) -> Option<&PipeName> {
        self.request.pipe()
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Chunk> {
        match &self.request {
            Request::Data { chunk, .. } => Some(chunk),
            _ => None,
        }
    }
}

/// Encoder/decoder bound to one protocol tag
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    tag: Bytes,
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: Bytes::copy_from_slice(tag.as_bytes()),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    #[must_use]
    pub fn encode_request(&self, request: &Request) -> Message {
        match request {
            Request::Hello => self.frames(Command::Hello, None, None),
            Request::Listen(pipe) | Request::Unlisten(pipe) => {
                self.frames(request.command(), Some(pipe), None)
            }
            Request::Data { pipe, chunk } => self.frames(Command::Data, Some(pipe), Some(chunk)),
        }
    }

    #[must_use]
    pub fn encode_reply(&self, reply: &Reply) -> Message {
        match reply {
            Reply::Hello => self.frames(Command::Hello, None, None),
            Reply::Ack => self.frames(Command::Ack, None, None),
            Reply::Data { pipe, chunk } => self.frames(Command::Data, Some(pipe), Some(chunk)),
        }
    }

    /// Decode a request received from `client`
    ///
    /// # Errors
    /// Returns a `ProtocolError` describing the first problem found.
    pub fn decode_request(
        &self,
        client: ClientId,
        message: &[Bytes],
    ) -> Result<Envelope, ProtocolError> {
        let (command, rest) = self.split_header(message)?;
        let request = match command {
            Command::Hello => Request::Hello,
            Command::Listen => Request::Listen(pipe_name(command, rest)?),
            Command::Unlisten => Request::Unlisten(pipe_name(command, rest)?),
            Command::Data => Request::Data {
                pipe: pipe_name(command, rest)?,
                chunk: payload(rest)?,
            },
            Command::Ack => return Err(ProtocolError::UnexpectedCommand(command)),
        };
        Ok(Envelope::new(client, request))
    }

    /// Decode a reply received from the broker
    ///
    /// # Errors
    /// Returns a `ProtocolError` describing the first problem found.
    pub fn decode_reply(&self, message: &[Bytes]) -> Result<Reply, ProtocolError> {
        let (command, rest) = self.split_header(message)?;
        match command {
            Command::Hello => Ok(Reply::Hello),
            Command::Ack => Ok(Reply::Ack),
            Command::Data => Ok(Reply::Data {
                pipe: pipe_name(command, rest)?,
                chunk: payload(rest)?,
            }),
            Command::Listen | Command::Unlisten => Err(ProtocolError::UnexpectedCommand(command)),
        }
    }

    fn split_header<'a>(
        &self,
        message: &'a [Bytes],
    ) -> Result<(Command, &'a [Bytes]), ProtocolError> {
        let Some((tag, rest)) = message.split_first() else {
            return Err(ProtocolError::Empty);
        };
        if *tag != self.tag {
            return Err(ProtocolError::TagMismatch {
                expected: String::from_utf8_lossy(&self.tag).into_owned(),
                got: String::from_utf8_lossy(tag).into_owned(),
            });
        }
        let Some((command, rest)) = rest.split_first() else {
            return Err(ProtocolError::MissingCommand);
        };
        let command = Command::parse(command).ok_or_else(|| {
            ProtocolError::UnknownCommand(String::from_utf8_lossy(command).into_owned())
        })?;
        Ok((command, rest))
    }

    fn frames(&self, command: Command, pipe: Option<&PipeName>, chunk: Option<&Chunk>) -> Message {
        let mut message = Vec::with_capacity(4);
        message.push(self.tag.clone());
        message.push(Bytes::from_static(command.as_str().as_bytes()));
        if let Some(pipe) = pipe {
            message.push(Bytes::copy_from_slice(pipe.as_str().as_bytes()));
        }
        if let Some(chunk) = chunk {
            message.push(chunk.clone());
        }
        message
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(PROTOCOL_TAG)
    }
}

fn pipe_name(command: Command, rest: &[Bytes]) -> Result<PipeName, ProtocolError> {
    let frame = rest.first().ok_or(ProtocolError::MissingPipeName(command))?;
    let name = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidPipeName)?;
    PipeName::new(name)
}

fn payload(rest: &[Bytes]) -> Result<Chunk, ProtocolError> {
    rest.get(1).cloned().ok_or(ProtocolError::MissingPayload)
}
