use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use skypipe::{
    Chunk, ClientId, Deliverable, DeliveryError, DispatchReport, Dispatcher, Envelope,
    EnvelopeCodec, Message, PipeName, PipeRegistry, Reply, Request,
};

/// Deliverable that records decoded replies
struct RecordingClient {
    id: ClientId,
    codec: EnvelopeCodec,
    inbox: Mutex<Vec<Reply>>,
    broken: bool,
}

impl RecordingClient {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::from(id),
            codec: EnvelopeCodec::default(),
            inbox: Mutex::new(Vec::new()),
            broken: false,
        })
    }

    fn broken(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::from(id),
            codec: EnvelopeCodec::default(),
            inbox: Mutex::new(Vec::new()),
            broken: true,
        })
    }

    fn take(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.inbox.lock())
    }
}

impl Deliverable for RecordingClient {
    fn send(&self, message: Message) -> Result<(), DeliveryError> {
        if self.broken {
            return Err(DeliveryError::Closed(self.id.clone()));
        }
        let reply = self.codec.decode_reply(&message).unwrap();
        self.inbox.lock().push(reply);
        Ok(())
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    registry: Arc<PipeRegistry>,
}

impl Fixture {
    fn new() -> Self {
        let registry = Arc::new(PipeRegistry::new());
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), EnvelopeCodec::default()),
            registry,
        }
    }

    fn connect(&mut self, client: &Arc<RecordingClient>) {
        let deliverable: Arc<dyn Deliverable> = client.clone();
        self.dispatcher.connect(client.id.clone(), deliverable);
    }

    fn send(&self, client: &Arc<RecordingClient>, request: Request) -> DispatchReport {
        self.dispatcher
            .dispatch(&Envelope::new(client.id.clone(), request))
    }
}

fn pipe(name: &str) -> PipeName {
    PipeName::new(name).unwrap()
}

fn data(pipe_name: &str, payload: &'static [u8]) -> Request {
    Request::Data {
        pipe: pipe(pipe_name),
        chunk: Chunk::from_static(payload),
    }
}

fn data_reply(pipe_name: &str, payload: &'static [u8]) -> Reply {
    Reply::Data {
        pipe: pipe(pipe_name),
        chunk: Chunk::from_static(payload),
    }
}

#[test]
fn test_hello() {
    let mut fx = Fixture::new();
    let c1 = RecordingClient::new("c1");
    fx.connect(&c1);

    let report = fx.send(&c1, Request::Hello);

    assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
    assert_eq!(c1.take(), vec![Reply::Hello]);
    assert_eq!(fx.registry.pipe_count(), 0);
}

#[test]
fn test_listen_on_empty_pipe_acks() {
    let mut fx = Fixture::new();
    let c1 = RecordingClient::new("c1");
    fx.connect(&c1);

    fx.send(&c1, Request::Listen(pipe("X")));

    assert_eq!(c1.take(), vec![Reply::Ack]);
    assert!(fx.registry.is_listening(&pipe("X"), &ClientId::from("c1")));
}

#[test]
fn test_buffered_data_goes_to_first_listener() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let reader = RecordingClient::new("reader");
    fx.connect(&writer);
    fx.connect(&reader);

    fx.send(&writer, data("X", b"b1"));
    fx.send(&writer, data("X", b"b2"));
    assert_eq!(writer.take(), vec![Reply::Ack, Reply::Ack]);

    fx.send(&reader, Request::Listen(pipe("X")));

    // DATA replaces the ACK for a LISTEN that releases a chunk
    assert_eq!(reader.take(), vec![data_reply("X", b"b1")]);
    assert_eq!(fx.registry.pending_len(&pipe("X")), 1);
}

#[test]
fn test_data_is_forwarded_to_listener_and_acked() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let reader = RecordingClient::new("reader");
    fx.connect(&writer);
    fx.connect(&reader);
    fx.send(&reader, Request::Listen(pipe("X")));
    reader.take();

    let report = fx.send(&writer, data("X", b"b"));

    assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
    assert_eq!(reader.take(), vec![data_reply("X", b"b")]);
    assert_eq!(writer.take(), vec![Reply::Ack]);
    assert_eq!(fx.registry.pending_len(&pipe("X")), 0);
}

#[test]
fn test_fan_out_with_exactly_one_ack() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let c1 = RecordingClient::new("c1");
    let c2 = RecordingClient::new("c2");
    for client in [&writer, &c1, &c2] {
        fx.connect(client);
    }
    fx.send(&c1, Request::Listen(pipe("X")));
    fx.send(&c2, Request::Listen(pipe("X")));
    c1.take();
    c2.take();

    fx.send(&writer, data("X", b"b"));

    assert_eq!(c1.take(), vec![data_reply("X", b"b")]);
    assert_eq!(c2.take(), vec![data_reply("X", b"b")]);
    assert_eq!(writer.take(), vec![Reply::Ack]);
}

#[test]
fn test_listener_order_is_publish_order() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let reader = RecordingClient::new("reader");
    fx.connect(&writer);
    fx.connect(&reader);
    fx.send(&reader, Request::Listen(pipe("X")));
    reader.take();

    fx.send(&writer, data("X", b"1"));
    fx.send(&writer, data("X", b"2"));
    fx.send(&writer, data("X", b"3"));

    assert_eq!(
        reader.take(),
        vec![data_reply("X", b"1"), data_reply("X", b"2"), data_reply("X", b"3")]
    );
}

#[test]
fn test_failed_listener_does_not_block_others() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let good = RecordingClient::new("good");
    let bad = RecordingClient::broken("bad");
    for client in [&writer, &good, &bad] {
        fx.connect(client);
    }
    fx.registry.listen(&pipe("X"), &good.id);
    fx.registry.listen(&pipe("X"), &bad.id);

    let report = fx.send(&writer, data("X", b"b"));

    assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
    assert_eq!(good.take(), vec![data_reply("X", b"b")]);
    assert_eq!(writer.take(), vec![Reply::Ack]);
}

#[test]
fn test_unlisten_always_acks() {
    let mut fx = Fixture::new();
    let c1 = RecordingClient::new("c1");
    fx.connect(&c1);

    fx.send(&c1, Request::Unlisten(pipe("never")));
    fx.send(&c1, Request::Listen(pipe("X")));
    fx.send(&c1, Request::Unlisten(pipe("X")));

    assert_eq!(c1.take(), vec![Reply::Ack, Reply::Ack, Reply::Ack]);
    assert!(fx.registry.listeners(&pipe("X")).is_empty());
}

#[test]
fn test_malformed_messages_are_dropped() {
    let mut fx = Fixture::new();
    let c1 = RecordingClient::new("c1");
    fx.connect(&c1);

    let unknown: Message = vec![Bytes::from_static(b"SKYPIPE/0.2"), Bytes::from_static(b"PING")];
    let wrong_tag: Message = vec![
        Bytes::from_static(b"SKYPIPE/0.1"),
        Bytes::from_static(b"DATA"),
        Bytes::from_static(b"X"),
        Bytes::from_static(b"b"),
    ];
    let no_pipe: Message = vec![Bytes::from_static(b"SKYPIPE/0.2"), Bytes::from_static(b"LISTEN")];

    assert!(fx.dispatcher.handle_message(c1.id.clone(), &unknown).is_none());
    assert!(fx.dispatcher.handle_message(c1.id.clone(), &wrong_tag).is_none());
    assert!(fx.dispatcher.handle_message(c1.id.clone(), &no_pipe).is_none());

    assert!(c1.take().is_empty());
    assert_eq!(fx.registry.pipe_count(), 0);

    // Still serving afterwards
    let hello: Message = vec![Bytes::from_static(b"SKYPIPE/0.2"), Bytes::from_static(b"HELLO")];
    assert!(fx.dispatcher.handle_message(c1.id.clone(), &hello).is_some());
    assert_eq!(c1.take(), vec![Reply::Hello]);
}

#[test]
fn test_disconnect_evicts_listener() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let reader = RecordingClient::new("reader");
    fx.connect(&writer);
    fx.connect(&reader);
    fx.send(&reader, Request::Listen(pipe("X")));

    assert_eq!(fx.dispatcher.disconnect(&reader.id), 1);
    assert_eq!(fx.dispatcher.client_count(), 1);

    // Without listeners the next chunk is held, not lost
    fx.send(&writer, data("X", b"kept"));
    assert_eq!(fx.registry.pending_len(&pipe("X")), 1);
}

#[test]
fn test_chat_scenario() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    let reader1 = RecordingClient::new("reader1");
    let reader2 = RecordingClient::new("reader2");
    for client in [&writer, &reader1, &reader2] {
        fx.connect(client);
    }

    fx.send(&writer, data("chat", b"hello"));
    fx.send(&reader1, Request::Listen(pipe("chat")));
    assert_eq!(reader1.take(), vec![data_reply("chat", b"hello")]);

    fx.send(&reader1, Request::Unlisten(pipe("chat")));
    assert_eq!(reader1.take(), vec![Reply::Ack]);
    assert!(fx.registry.listeners(&pipe("chat")).is_empty());

    fx.send(&writer, data("chat", b"again"));
    fx.send(&reader2, Request::Listen(pipe("chat")));
    assert_eq!(reader2.take(), vec![data_reply("chat", b"again")]);
    assert_eq!(writer.take(), vec![Reply::Ack, Reply::Ack]);
}

#[test]
fn test_listener_without_connection_is_counted_as_failed() {
    let mut fx = Fixture::new();
    let writer = RecordingClient::new("writer");
    fx.connect(&writer);
    fx.registry.listen(&pipe("X"), &ClientId::from("ghost"));

    let report = fx.send(&writer, data("X", b"b"));

    assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
    assert_eq!(writer.take(), vec![Reply::Ack]);
}
