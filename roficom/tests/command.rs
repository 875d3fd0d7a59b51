mod common;

use common::{MockChannel, Wire, collect, make_pool};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use roficom::command::{
    BlobEnvelope, Command, CommandError, CommandPort, InterruptRequest, Request, UnknownCommand,
    Version,
};
use roficom::core::{ContentType, InterruptFlags};
use roficom::link::WriteResult;
use roficom::packet::Packet;
use roficom::pool::Pool;
use roficom::ring_buffer::{Consumer, RingBuffer};
use std::boxed::Box;
use std::sync::Mutex;
use std::vec::Vec;

type TestPort = CommandPort<'static, CriticalSectionRawMutex, MockChannel, 4>;

struct Setup {
    pool: Pool<'static>,
    wire: &'static Mutex<Wire>,
    port: &'static TestPort,
    requests: Consumer<'static, Result<Request<'static>, CommandError>, 4>,
}

impl Setup {
    fn new(blob_limit: usize) -> Self {
        let pool = make_pool();
        let wire: &'static Mutex<Wire> = Box::leak(Box::new(Mutex::new(Wire::default())));
        let requests: &'static mut RingBuffer<Result<Request<'static>, CommandError>, 4> =
            Box::leak(Box::new(RingBuffer::new()));
        let (producer, requests) = requests.split();
        let port: &'static TestPort = Box::leak(Box::new(CommandPort::new(
            pool,
            MockChannel(wire),
            blob_limit,
            producer,
        )));
        port.enable();
        Self {
            pool,
            wire,
            port,
            requests,
        }
    }

    /// Completes the oldest response and returns its bytes
    fn complete(&self) -> Vec<u8> {
        let write = self.wire.lock().unwrap().writes.pop_front().unwrap();
        let bytes = write.bytes().to_vec();
        let length = write.length;
        self.port
            .link()
            .write_complete(write.buffer, WriteResult::Written(length));
        bytes
    }

    fn send_blob(&self, content_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; 1 + BlobEnvelope::LENGTH + payload.len()];
        bytes[0] = Command::SendBlob as u8;
        BlobEnvelope {
            content_type: ContentType::new(content_type),
            length: payload.len() as u16,
        }
        .encode(&mut bytes[1..]);
        bytes[1 + BlobEnvelope::LENGTH..].copy_from_slice(payload);
        bytes
    }
}

#[test]
fn test_version_and_interrupt() {
    let mut setup = Setup::new(64);
    let link = setup.port.link();

    link.received(&[Command::Version as u8]);
    assert!(matches!(setup.requests.pop_front(), Some(Ok(Request::Version))));
    setup
        .port
        .respond(Version::LENGTH, |bytes| Version::CURRENT.encode(bytes))
        .unwrap();
    assert_eq!(setup.port.pending_responses(), 1);
    assert_eq!(Version::decode(&setup.complete()), Version::CURRENT);
    link.transaction_end();
    assert!(setup.requests.pop_front().is_none());

    // Arguments arrive split across receive callbacks
    let mask = InterruptFlags::ALL.into_bits().to_ne_bytes();
    link.received(&[Command::Interrupt as u8, mask[0]]);
    assert!(setup.requests.pop_front().is_none());
    link.received(&mask[1..]);
    match setup.requests.pop_front() {
        Some(Ok(Request::Interrupt(request))) => assert_eq!(request.mask, InterruptFlags::ALL),
        other => panic!("unexpected request {other:?}"),
    }
    setup
        .port
        .respond(InterruptRequest::RESPONSE_LENGTH, |bytes| {
            InterruptRequest::encode_response(InterruptFlags::NEW_BLOB, bytes)
        })
        .unwrap();
    assert_eq!(
        setup.complete(),
        InterruptFlags::NEW_BLOB.into_bits().to_ne_bytes()
    );
    link.transaction_end();
    assert_eq!(setup.port.pending_responses(), 0);
    assert_eq!(setup.pool.free_blocks(), setup.pool.total_blocks());
}

#[test]
fn test_unknown_and_truncated_commands() {
    let mut setup = Setup::new(64);
    let link = setup.port.link();

    link.received(&[7, Command::Version as u8]);
    link.transaction_end();
    assert!(matches!(
        setup.requests.pop_front(),
        Some(Err(CommandError::Unknown(UnknownCommand(7))))
    ));
    assert!(setup.requests.pop_front().is_none());

    link.received(&[Command::Status as u8, 0, 0]);
    link.transaction_end();
    assert!(matches!(
        setup.requests.pop_front(),
        Some(Err(CommandError::Truncated(Command::Status)))
    ));

    // The next transaction starts with a fresh command code
    link.received(&[Command::Version as u8]);
    assert_eq!(
        setup.requests.pop_front().unwrap().map(|r| r.command()),
        Ok(Command::Version)
    );
}

#[test]
fn test_send_blob() {
    let mut setup = Setup::new(64);
    let link = setup.port.link();
    let total = setup.pool.free_blocks();

    let bytes = setup.send_blob(7, b"Hello");
    for part in bytes.chunks(2) {
        link.received(part);
    }
    link.transaction_end();
    match setup.requests.pop_front() {
        Some(Ok(Request::SendBlob {
            content_type,
            packet,
        })) => {
            assert_eq!(content_type, ContentType::new(7));
            assert_eq!(collect(&packet), b"Hello");
        }
        other => panic!("unexpected request {other:?}"),
    }
    assert_eq!(setup.pool.free_blocks(), total);

    // A cut payload gives its buffer back
    link.received(&bytes[..7]);
    assert_eq!(setup.pool.free_blocks(), total - 1);
    link.transaction_end();
    assert!(matches!(
        setup.requests.pop_front(),
        Some(Err(CommandError::Truncated(Command::SendBlob)))
    ));
    assert_eq!(setup.pool.free_blocks(), total);

    let long = setup.send_blob(1, &[0u8; 65]);
    link.received(&long);
    link.transaction_end();
    assert!(matches!(
        setup.requests.pop_front(),
        Some(Err(CommandError::BlobTooLong))
    ));
    assert_eq!(setup.pool.free_blocks(), total);
}

#[test]
fn test_receive_blob() {
    let mut setup = Setup::new(64);
    let link = setup.port.link();

    link.received(&[Command::ReceiveBlob as u8]);
    assert!(matches!(
        setup.requests.pop_front(),
        Some(Ok(Request::ReceiveBlob))
    ));
    setup.port.respond_blob(None).unwrap();
    assert_eq!(setup.complete(), [0u8; BlobEnvelope::LENGTH]);
    link.transaction_end();

    link.received(&[Command::ReceiveBlob as u8]);
    assert!(setup.requests.pop_front().is_some());
    let packet = Packet::from_slice(&setup.pool, b"Hello").unwrap();
    setup
        .port
        .respond_blob(Some((ContentType::new(3), &packet)))
        .unwrap();
    let bytes = setup.complete();
    let envelope = BlobEnvelope::decode(&bytes);
    assert_eq!(envelope.content_type, ContentType::new(3));
    assert!(envelope.matches(bytes.len()));
    assert_eq!(&bytes[BlobEnvelope::LENGTH..], b"Hello");
    link.transaction_end();
    drop(packet);
    assert_eq!(setup.pool.free_blocks(), setup.pool.total_blocks());
}

#[test]
fn test_transaction_end_aborts_response() {
    let mut setup = Setup::new(64);
    let link = setup.port.link();

    link.received(&[Command::ReceiveBlob as u8]);
    assert!(setup.requests.pop_front().is_some());
    setup.port.respond_blob(None).unwrap();
    link.transaction_end();
    assert_eq!(setup.wire.lock().unwrap().tx_aborts, 1);

    let write = setup.wire.lock().unwrap().writes.pop_front().unwrap();
    link.write_complete(write.buffer, WriteResult::Aborted);
    assert_eq!(setup.port.pending_responses(), 0);
    assert_eq!(setup.pool.free_blocks(), setup.pool.total_blocks());

    // Nothing outstanding, nothing to abort
    link.received(&[Command::Version as u8]);
    link.transaction_end();
    assert_eq!(setup.wire.lock().unwrap().tx_aborts, 1);
}

#[test]
fn test_full_request_queue() {
    let setup = Setup::new(64);
    let link = setup.port.link();
    // Four slots hold three requests
    for _ in 0..5 {
        link.received(&[Command::Version as u8]);
        link.transaction_end();
    }
    assert_eq!(setup.port.dropped_requests(), 2);
}
