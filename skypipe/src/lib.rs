pub mod broker;
pub mod client;
pub mod config;
pub mod deliverable;
pub mod dispatcher;
pub mod envelope;
pub mod idgen;
pub mod monitor;
pub mod pipe;
pub mod registry;
pub mod server;
pub mod wire;

// Re-export core types for convenience
pub use idgen::{ClientId, IdGen};
pub use pipe::{Chunk, Pipe, PipeName};
pub use registry::{DeliveryAction, PipeRegistry, RegistryStats};

// Re-export protocol types
pub use envelope::{
    Command, Envelope, EnvelopeCodec, Message, ProtocolError, Reply, Request, PROTOCOL_TAG,
};
pub use wire::WireError;

// Re-export broker side
pub use broker::{Broker, BrokerEvent, BrokerSender};
pub use deliverable::{Deliverable, DeliveryError, Outbox};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use monitor::{ConnectionEvent, MonitorHandle, MonitorStats};
pub use server::{Server, ServerReport};

// Re-export client side
pub use client::{receive_output, send_input, ClientError, Connection};
pub use config::{ClientConfig, ServerConfig};
