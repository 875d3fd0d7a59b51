//! Blob framer
//!
//! The framer turns application packets into a stream of blobs on a [`ByteChannel`] and
//! reassembles packets from the inbound stream.
//!
//! ```text
//!           send(ContentType, Packet)                 Event ring buffer
//!                     |                                        ^
//!                     v                                        |
//!  +------------------+----------------------------------------+--------+
//!  | outbound queue -> scatter -> blob buffer    gather <- blob blocks  |
//!  +------------------+----------------------------------------+--------+
//!                     | ByteChannel::write                     | Link::received
//!                     v                                        |
//!                               byte channel driver
//! ```
//!
//! A packet is split into blobs of at most `max_blob_payload` bytes, so a packet that fits
//! one blob goes out as a plain `[length][payload][crc]` blob. With
//! [`Config::content_type_prefix`] set, the content type travels as the first two bytes of
//! the packet stream and counts against the blob payload.
//!
//! One blob buffer is allocated per packet and refilled after each write completion, so a
//! packet occupies at most one extra block while in flight.
//!
//! Received blobs are kept in the pool blocks they were received into. The delivered
//! [`Packet`] refers to the payload ranges of those blocks without copying.
//!
//! All faults are recoverable. The receiver drops the partial packet, reports
//! [`Event::ReceiveFailed`] and ignores input until the next transaction end. The sender
//! fails the in-flight packet with [`Event::SendFailed`] and continues with the next one.
//! Nothing is retransmitted.
//!
//! ## Examples
//!
//! The framer is normally placed in static memory together with its event queue, so the
//! driver, the connector and the application can share `'static` handles:
//! ```
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex as Mutex;
//! use roficom::connector::{self, Connector, ConnectorEvent};
//! use roficom::framer::{Config, Event, Framer};
//! use roficom::link::ByteChannel;
//! use roficom::pool::{Block, Bucket, Pool, SizeClass};
//! use roficom::ring_buffer::RingBuffer;
//! use static_cell::StaticCell;
//!
//! // SPI slave driver of the control board
//! struct Spi;
//!
//! impl ByteChannel<Block<'static>> for Spi {
//!     fn enable(&mut self) {}
//!     fn disable(&mut self) {}
//!     fn write(&mut self, _buffer: Block<'static>, _offset: usize, _length: usize) {}
//!     fn abort_rx(&mut self) {}
//!     fn abort_tx(&mut self) {}
//! }
//!
//! static SMALL: Bucket<Mutex, 16, 32> = Bucket::new();
//! static LARGE: Bucket<Mutex, 518, 8> = Bucket::new();
//! static CLASSES: [&(dyn SizeClass + Sync); 2] = [&SMALL, &LARGE];
//!
//! static EVENTS: StaticCell<RingBuffer<Event<'static>, 8>> = StaticCell::new();
//! static FRAMER: StaticCell<Framer<'static, Mutex, Spi, 4, 8>> = StaticCell::new();
//! static CONNECTOR_EVENTS: StaticCell<RingBuffer<ConnectorEvent, 4>> = StaticCell::new();
//!
//! let pool = Pool::new(&CLASSES);
//! let (producer, mut events) = EVENTS.init(RingBuffer::new()).split();
//! let framer: &'static _ = FRAMER.init(Framer::new(pool, Spi, Config::default(), producer));
//!
//! let (producer, _) = CONNECTOR_EVENTS.init(RingBuffer::new()).split();
//! let connector = Connector::<Mutex, 4>::new(framer, connector::Config::default(), producer);
//!
//! // Handed to the SPI interrupt handlers
//! let _link = framer.link();
//!
//! connector.handle(connector::Input::ContactMade);
//! assert!(!framer.is_enabled());
//! assert!(events.pop_front().is_none());
//! ```

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use roficom_driver::internal::{DynamicLink, DynamicRx, DynamicTx};
use roficom_driver::link::{ByteChannel, Link, WriteResult};

use crate::connector::LinkGate;
use crate::core::ContentType;
use crate::format::{self, CONTENT_TYPE_LENGTH, MAX_PAYLOAD_LENGTH, OVERHEAD};
use crate::packet::{Chunk, MAX_CHUNKS, Packet};
use crate::pool::{Block, Pool};
use crate::ring_buffer::{Producer, RingBuffer};

mod gather;
mod scatter;

use gather::{Gather, Output};
use scatter::Scatter;

pub use gather::RxState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Maximal payload of a single blob
    pub max_blob_payload: usize,
    /// Maximal packet length, excluding the content type
    pub max_packet_len: usize,
    /// Carry the content type as a two-byte prefix of the packet stream.
    ///
    /// Without the prefix the blob payload is exactly the application data, the content type
    /// passed to `send` is not transmitted and received packets report the default one.
    pub content_type_prefix: bool,
}

impl Config {
    fn tag_length(&self) -> usize {
        if self.content_type_prefix {
            CONTENT_TYPE_LENGTH
        } else {
            0
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_blob_payload: 512,
            max_packet_len: 2048,
            content_type_prefix: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    OutOfMemory,
    CrcMismatch,
    LengthOutOfRange,
    /// The channel cut a blob, or a write did not complete
    ChannelAborted,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The link is gated off
    Disconnected,
    TooLong,
    QueueFull,
    OutOfMemory,
}

/// Identifies an accepted packet in send outcome events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket(u16);

impl Ticket {
    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

#[derive(Debug)]
pub enum Event<'a> {
    Received {
        content_type: ContentType,
        packet: Packet<'a>,
    },
    Sent {
        ticket: Ticket,
    },
    SendFailed {
        ticket: Ticket,
        error: LinkError,
    },
    ReceiveFailed {
        error: LinkError,
        /// Faults since the last valid blob
        consecutive: u8,
    },
}

/// Link counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    pub blobs_sent: u32,
    pub blobs_received: u32,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub send_failures: u32,
    pub crc_errors: u32,
    pub length_errors: u32,
    pub allocation_failures: u32,
    pub aborts: u32,
    pub dropped_events: u32,
}

struct Outgoing<'a> {
    ticket: Ticket,
    packet: Packet<'a>,
}

struct Transmission<'a> {
    ticket: Ticket,
    packet: Packet<'a>,
    scatter: Scatter,
    expected: usize,
}

enum TxState<'a> {
    Idle,
    Sending(Transmission<'a>),
    /// The packet on the wire was dropped, the channel still owes the blob buffer back
    Cancelled,
}

/// Outbound half of the event path
struct Reporter<'a, const E: usize> {
    events: Producer<'a, Event<'a>, E>,
    content_type_prefix: bool,
    statistics: Statistics,
    consecutive_faults: u8,
}

impl<'a, const E: usize> Reporter<'a, E> {
    fn emit(&mut self, event: Event<'a>) {
        if self.events.push_back(event).is_err() {
            self.statistics.dropped_events = self.statistics.dropped_events.wrapping_add(1);
            warn!("framer event queue full, event dropped");
        }
    }

    fn send_failed(&mut self, ticket: Ticket, error: LinkError) {
        debug!("packet {} failed: {:?}", ticket.0, error);
        self.statistics.send_failures = self.statistics.send_failures.wrapping_add(1);
        self.emit(Event::SendFailed { ticket, error });
    }

    fn receive_failed(&mut self, error: LinkError) {
        let counter = match error {
            LinkError::CrcMismatch => &mut self.statistics.crc_errors,
            LinkError::LengthOutOfRange => &mut self.statistics.length_errors,
            LinkError::OutOfMemory => &mut self.statistics.allocation_failures,
            LinkError::ChannelAborted | LinkError::Disconnected => &mut self.statistics.aborts,
        };
        *counter = counter.wrapping_add(1);
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        debug!(
            "receive failed: {:?}, consecutive {}",
            error, self.consecutive_faults
        );
        self.emit(Event::ReceiveFailed {
            error,
            consecutive: self.consecutive_faults,
        });
    }

    fn deliver(&mut self, output: Output<'a>) {
        match output {
            Output::Blob => {
                self.statistics.blobs_received = self.statistics.blobs_received.wrapping_add(1);
                self.consecutive_faults = 0;
            }
            Output::Packet(mut packet) => {
                let content_type = if self.content_type_prefix {
                    if packet.len() < CONTENT_TYPE_LENGTH {
                        return self.receive_failed(LinkError::LengthOutOfRange);
                    }
                    let mut tag = [0; CONTENT_TYPE_LENGTH];
                    packet.copy_to_slice(0, &mut tag);
                    packet.advance(CONTENT_TYPE_LENGTH);
                    ContentType::new(format::read_u16(&tag, 0))
                } else {
                    ContentType::default()
                };

                self.statistics.packets_received =
                    self.statistics.packets_received.wrapping_add(1);
                trace!("received {} bytes of {}", packet.len(), content_type.into_u16());
                self.emit(Event::Received {
                    content_type,
                    packet,
                });
            }
            Output::Fault(error) => self.receive_failed(error),
        }
    }
}

struct Inner<'a, C, const Q: usize, const E: usize> {
    channel: C,
    enabled: bool,
    next_ticket: u16,
    queue: RingBuffer<Outgoing<'a>, Q>,
    tx: TxState<'a>,
    gather: Gather<'a>,
    reporter: Reporter<'a, E>,
}

impl<'a, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize> Inner<'a, C, Q, E> {
    /// Starts the next queued packet if the transmitter is idle
    fn start_next(&mut self, pool: &Pool<'a>, max_payload: usize) {
        while matches!(self.tx, TxState::Idle) {
            let Some(Outgoing { ticket, packet }) = self.queue.pop_front() else {
                return;
            };
            let mut scatter = Scatter::new(packet.len(), max_payload);
            let mut blob = match pool.allocate(scatter.max_blob_length()) {
                Ok(blob) => blob,
                Err(_) => {
                    warn!("no blob buffer for packet {}", ticket.0);
                    self.reporter.statistics.allocation_failures =
                        self.reporter.statistics.allocation_failures.wrapping_add(1);
                    self.reporter.send_failed(ticket, LinkError::OutOfMemory);
                    continue;
                }
            };
            let length = unwrap!(scatter.fetch_blob(&packet, unwrap!(blob.get_mut())));
            trace!(
                "packet {} started, {} blobs",
                ticket.0,
                scatter.blob_count()
            );
            self.tx = TxState::Sending(Transmission {
                ticket,
                packet,
                scatter,
                expected: length,
            });
            self.channel.write(blob, 0, length);
        }
    }

    /// Fails every queued packet
    fn flush_queue(&mut self, error: LinkError) {
        while let Some(outgoing) = self.queue.pop_front() {
            self.reporter.send_failed(outgoing.ticket, error);
        }
    }
}

/// Packet framer over a byte channel
///
/// `Q` is the depth of the outbound packet queue and `E` the depth of the event queue.
/// Both ring buffers keep one slot free, so they hold `Q - 1` and `E - 1` items.
pub struct Framer<'a, M: RawMutex, C, const Q: usize, const E: usize> {
    pool: Pool<'a>,
    config: Config,
    inner: Mutex<M, RefCell<Inner<'a, C, Q, E>>>,
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize>
    Framer<'a, M, C, Q, E>
{
    /// Creates a disabled framer.
    ///
    /// Panics if the configuration does not fit the pool or the wire format.
    pub fn new(
        pool: Pool<'a>,
        channel: C,
        config: Config,
        events: Producer<'a, Event<'a>, E>,
    ) -> Self {
        assert!(
            config.max_blob_payload > 0 && config.max_blob_payload <= MAX_PAYLOAD_LENGTH,
            "blob payload limit out of range"
        );
        assert!(
            OVERHEAD + config.max_blob_payload <= pool.max_block_size(),
            "pool cannot hold a full blob"
        );
        assert!(
            (config.max_packet_len + config.tag_length()).div_ceil(config.max_blob_payload)
                <= MAX_CHUNKS,
            "packet limit needs too many blobs"
        );

        Self {
            pool,
            config,
            inner: Mutex::new(RefCell::new(Inner {
                channel,
                enabled: false,
                next_ticket: 0,
                queue: RingBuffer::new(),
                tx: TxState::Idle,
                gather: Gather::new(
                    config.max_blob_payload,
                    config.max_packet_len + config.tag_length(),
                ),
                reporter: Reporter {
                    events,
                    content_type_prefix: config.content_type_prefix,
                    statistics: Statistics::default(),
                    consecutive_faults: 0,
                },
            })),
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn pool(&self) -> Pool<'a> {
        self.pool
    }

    /// Queues a packet for transmission.
    ///
    /// The packet is returned with the error if it was not accepted. An accepted packet
    /// produces exactly one `Sent` or `SendFailed` event carrying the returned ticket.
    pub fn send(
        &self,
        content_type: ContentType,
        mut packet: Packet<'a>,
    ) -> Result<Ticket, (SendError, Packet<'a>)> {
        if packet.len() > self.config.max_packet_len {
            return Err((SendError::TooLong, packet));
        }
        if !self.is_enabled() {
            return Err((SendError::Disconnected, packet));
        }
        let tag_length = self.config.tag_length();
        if tag_length > 0 {
            let mut prefix = match self.pool.allocate(tag_length) {
                Ok(block) => block,
                Err(_) => return Err((SendError::OutOfMemory, packet)),
            };
            format::write_u16(unwrap!(prefix.get_mut()), 0, content_type.into_u16());
            if packet
                .push_front_chunk(Chunk::new(prefix, 0..tag_length))
                .is_err()
            {
                return Err((SendError::TooLong, packet));
            }
        }

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let inner = &mut *inner;
            if !inner.enabled {
                packet.advance(tag_length);
                return Err((SendError::Disconnected, packet));
            }

            let ticket = Ticket(inner.next_ticket);
            if let Err(outgoing) = inner.queue.push_back(Outgoing { ticket, packet }) {
                let mut packet = outgoing.packet;
                packet.advance(tag_length);
                return Err((SendError::QueueFull, packet));
            }
            inner.next_ticket = inner.next_ticket.wrapping_add(1);
            inner.start_next(&self.pool, self.config.max_blob_payload);
            Ok(ticket)
        })
    }

    /// Driver-side handle of the framer
    pub fn link(&self) -> Link<'_, Block<'a>>
    where
        Self: Sync,
    {
        Link::new(self)
    }

    /// Opens the link, dropping any stale receive state.
    pub fn enable(&self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.enabled {
                return;
            }
            inner.gather.reset();
            inner.reporter.consecutive_faults = 0;
            inner.enabled = true;
            inner.channel.enable();
            debug!("link enabled");
        })
    }

    /// Closes the link and fails every pending packet with `Disconnected`.
    pub fn disable(&self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let inner = &mut *inner;
            if !inner.enabled {
                return;
            }
            inner.enabled = false;
            inner.channel.abort_rx();
            inner.channel.abort_tx();
            inner.channel.disable();
            inner.gather.reset();

            match core::mem::replace(&mut inner.tx, TxState::Idle) {
                TxState::Sending(tx) => {
                    inner.tx = TxState::Cancelled;
                    inner.reporter.send_failed(tx.ticket, LinkError::Disconnected);
                }
                other => inner.tx = other,
            }
            inner.flush_queue(LinkError::Disconnected);
            debug!("link disabled");
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock(|inner| inner.borrow().enabled)
    }

    /// Number of queued and in-flight packets
    pub fn pending(&self) -> usize {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            let in_flight = usize::from(matches!(inner.tx, TxState::Sending(_)));
            inner.queue.len() + in_flight
        })
    }

    pub fn rx_state(&self) -> RxState {
        self.inner.lock(|inner| inner.borrow().gather.state())
    }

    pub fn statistics(&self) -> Statistics {
        self.inner.lock(|inner| inner.borrow().reporter.statistics)
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize> DynamicRx
    for Framer<'a, M, C, Q, E>
{
    fn on_received(&self, data: &[u8]) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let Inner {
                enabled,
                gather,
                reporter,
                ..
            } = &mut *inner;
            if !*enabled {
                return;
            }
            gather.push(&self.pool, data, &mut |output| reporter.deliver(output));
        })
    }

    fn on_transaction_end(&self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let inner = &mut *inner;
            if let Some(error) = inner.gather.transaction_end() {
                if inner.enabled {
                    inner.reporter.receive_failed(error);
                }
            }
        })
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize>
    DynamicTx<Block<'a>> for Framer<'a, M, C, Q, E>
{
    fn on_write_complete(&self, mut blob: Block<'a>, result: WriteResult) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let inner = &mut *inner;
            match core::mem::replace(&mut inner.tx, TxState::Idle) {
                TxState::Idle => warn!("unexpected write completion"),
                TxState::Cancelled => trace!("cancelled blob buffer returned"),
                TxState::Sending(mut tx) => {
                    if result != WriteResult::Written(tx.expected) {
                        inner.reporter.statistics.aborts =
                            inner.reporter.statistics.aborts.wrapping_add(1);
                        inner
                            .reporter
                            .send_failed(tx.ticket, LinkError::ChannelAborted);
                    } else {
                        let statistics = &mut inner.reporter.statistics;
                        statistics.blobs_sent = statistics.blobs_sent.wrapping_add(1);
                        match tx.scatter.fetch_blob(&tx.packet, unwrap!(blob.get_mut())) {
                            Some(length) => {
                                tx.expected = length;
                                inner.tx = TxState::Sending(tx);
                                inner.channel.write(blob, 0, length);
                                return;
                            }
                            None => {
                                statistics.packets_sent = statistics.packets_sent.wrapping_add(1);
                                trace!("packet {} sent", tx.ticket.0);
                                inner.reporter.emit(Event::Sent { ticket: tx.ticket });
                            }
                        }
                    }
                }
            }
            // Return the buffer before the next packet allocates one
            drop(blob);
            inner.start_next(&self.pool, self.config.max_blob_payload);
        })
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize>
    DynamicLink<Block<'a>> for Framer<'a, M, C, Q, E>
{
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const Q: usize, const E: usize> LinkGate
    for Framer<'a, M, C, Q, E>
{
    fn enable(&self) {
        Framer::enable(self);
    }

    fn disable(&self) {
        Framer::disable(self);
    }
}
