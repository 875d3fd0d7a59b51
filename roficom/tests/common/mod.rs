#![allow(dead_code)]

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use roficom::format::{BlobHeader, OVERHEAD, seal_blob};
use roficom::framer::{Config, Event, Framer};
use roficom::link::{ByteChannel, WriteResult};
use roficom::packet::Packet;
use roficom::pool::{Block, Bucket, Pool, SizeClass};
use roficom::ring_buffer::{Consumer, RingBuffer};
use std::boxed::Box;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::vec::Vec;

pub const SMALL_CONFIG: Config = Config {
    max_blob_payload: 12,
    max_packet_len: 64,
    content_type_prefix: true,
};

pub const PLAIN_CONFIG: Config = Config {
    max_blob_payload: 10,
    max_packet_len: 64,
    content_type_prefix: false,
};

pub struct Write {
    pub buffer: Block<'static>,
    pub offset: usize,
    pub length: usize,
}

impl Write {
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }
}

#[derive(Default)]
pub struct Wire {
    pub enabled: bool,
    pub writes: VecDeque<Write>,
    pub rx_aborts: usize,
    pub tx_aborts: usize,
}

/// Channel recording writes for the test to complete by hand
pub struct MockChannel(pub &'static Mutex<Wire>);

impl ByteChannel<Block<'static>> for MockChannel {
    fn enable(&mut self) {
        self.0.lock().unwrap().enabled = true;
    }

    fn disable(&mut self) {
        self.0.lock().unwrap().enabled = false;
    }

    fn write(&mut self, buffer: Block<'static>, offset: usize, length: usize) {
        self.0.lock().unwrap().writes.push_back(Write {
            buffer,
            offset,
            length,
        });
    }

    fn abort_rx(&mut self) {
        self.0.lock().unwrap().rx_aborts += 1;
    }

    fn abort_tx(&mut self) {
        self.0.lock().unwrap().tx_aborts += 1;
    }
}

pub type TestFramer = Framer<'static, CriticalSectionRawMutex, MockChannel, 4, 16>;

pub struct Setup {
    pub pool: Pool<'static>,
    pub wire: &'static Mutex<Wire>,
    pub framer: &'static TestFramer,
    pub events: Consumer<'static, Event<'static>, 16>,
}

impl Setup {
    pub fn new(config: Config) -> Self {
        let pool = make_pool();
        let wire: &'static Mutex<Wire> = Box::leak(Box::new(Mutex::new(Wire::default())));
        let events: &'static mut RingBuffer<Event<'static>, 16> =
            Box::leak(Box::new(RingBuffer::new()));
        let (producer, events) = events.split();
        let framer: &'static TestFramer = Box::leak(Box::new(Framer::new(
            pool,
            MockChannel(wire),
            config,
            producer,
        )));
        Self {
            pool,
            wire,
            framer,
            events,
        }
    }

    pub fn take_write(&self) -> Option<Write> {
        self.wire.lock().unwrap().writes.pop_front()
    }

    pub fn complete(&self, write: Write) {
        let length = write.length;
        self.framer
            .link()
            .write_complete(write.buffer, WriteResult::Written(length));
    }

    pub fn drain(&mut self) -> Vec<Event<'static>> {
        let mut events = Vec::new();
        while let Some(event) = self.events.pop_front() {
            events.push(event);
        }
        events
    }

    pub fn packet(&self, data: &[u8]) -> Packet<'static> {
        Packet::from_slice(&self.pool, data).unwrap()
    }
}

pub fn make_pool() -> Pool<'static> {
    let small: &'static Bucket<CriticalSectionRawMutex, 8, 32> = Box::leak(Box::new(Bucket::new()));
    let medium: &'static Bucket<CriticalSectionRawMutex, 64, 16> =
        Box::leak(Box::new(Bucket::new()));
    let large: &'static Bucket<CriticalSectionRawMutex, 520, 8> =
        Box::leak(Box::new(Bucket::new()));
    let classes: &'static [&'static (dyn SizeClass + Sync)] = Box::leak(Box::new([
        small as &(dyn SizeClass + Sync),
        medium,
        large,
    ]));
    Pool::new(classes)
}

/// Encodes a single blob
pub fn blob(payload: &[u8], more: bool) -> Vec<u8> {
    let header = BlobHeader::new(payload.len(), more);
    let mut bytes = vec![0u8; OVERHEAD + payload.len()];
    bytes[..2].copy_from_slice(&header.to_bytes());
    bytes[2..2 + payload.len()].copy_from_slice(payload);
    seal_blob(&mut bytes, header);
    bytes
}

/// Prepends the content type the way the framer does
pub fn tagged(content_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = content_type.to_ne_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

pub fn collect(packet: &Packet<'_>) -> Vec<u8> {
    packet.chunks().flatten().copied().collect()
}
