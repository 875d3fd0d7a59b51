use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use roficom_driver::internal::{DynamicLink, DynamicRx, DynamicTx};
use roficom_driver::link::{ByteChannel, Link, WriteResult};

use super::parser::{CommandError, Parser, Request};
use super::BlobEnvelope;
use crate::core::ContentType;
use crate::packet::Packet;
use crate::pool::{AllocError, Block, Pool};
use crate::ring_buffer::Producer;

struct Inner<'a, C, const R: usize> {
    channel: C,
    parser: Parser<'a>,
    requests: Producer<'a, Result<Request<'a>, CommandError>, R>,
    responses: usize,
    dropped_requests: u32,
}

impl<'a, C, const R: usize> Inner<'a, C, R> {
    fn post(&mut self, result: Result<Request<'a>, CommandError>) {
        if self.requests.push_back(result).is_err() {
            self.dropped_requests = self.dropped_requests.wrapping_add(1);
            warn!("command queue full, request dropped");
        }
    }
}

/// Controller side of the command protocol over a byte channel
///
/// The driver reports the controller's transactions through [`CommandPort::link`]. Each
/// transaction yields at most one [`Request`] or [`CommandError`] in the request queue. The
/// application answers with [`CommandPort::respond`] or [`CommandPort::respond_blob`] while
/// the transaction is still open. A transaction end cancels an unfinished response.
pub struct CommandPort<'a, M: RawMutex, C, const R: usize> {
    pool: Pool<'a>,
    inner: Mutex<M, RefCell<Inner<'a, C, R>>>,
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const R: usize> CommandPort<'a, M, C, R> {
    /// Creates a port accepting blobs of up to `blob_limit` bytes.
    pub fn new(
        pool: Pool<'a>,
        channel: C,
        blob_limit: usize,
        requests: Producer<'a, Result<Request<'a>, CommandError>, R>,
    ) -> Self {
        assert!(
            BlobEnvelope::LENGTH + blob_limit <= pool.max_block_size(),
            "pool cannot hold a full blob"
        );
        assert!(
            blob_limit <= usize::from(u16::MAX),
            "blob limit exceeds the envelope"
        );
        Self {
            pool,
            inner: Mutex::new(RefCell::new(Inner {
                channel,
                parser: Parser::new(blob_limit),
                requests,
                responses: 0,
                dropped_requests: 0,
            })),
        }
    }

    pub fn enable(&self) {
        self.inner.lock(|inner| inner.borrow_mut().channel.enable())
    }

    pub fn disable(&self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.channel.abort_rx();
            inner.channel.abort_tx();
            inner.channel.disable();
            if let Some(error) = inner.parser.transaction_end() {
                debug!("command cut by disable: {:?}", error);
            }
        })
    }

    /// Driver-side handle of the port
    pub fn link(&self) -> Link<'_, Block<'a>>
    where
        Self: Sync,
    {
        Link::new(self)
    }

    /// Writes a response of `length` bytes filled in by `encode`.
    pub fn respond(
        &self,
        length: usize,
        encode: impl FnOnce(&mut [u8]),
    ) -> Result<(), AllocError> {
        let mut block = self.pool.allocate(length)?;
        encode(&mut unwrap!(block.get_mut())[..length]);
        self.write(block, length);
        Ok(())
    }

    /// Answers `ReceiveBlob` with the next waiting packet, or with an empty envelope.
    pub fn respond_blob(
        &self,
        blob: Option<(ContentType, &Packet<'_>)>,
    ) -> Result<(), AllocError> {
        let (envelope, packet) = match blob {
            Some((content_type, packet)) => {
                let limit = self.inner.lock(|inner| inner.borrow().parser.blob_limit());
                if packet.len() > limit {
                    return Err(AllocError::TooLarge);
                }
                let envelope = BlobEnvelope {
                    content_type,
                    length: packet.len() as u16,
                };
                (envelope, Some(packet))
            }
            None => (BlobEnvelope::EMPTY, None),
        };
        let length = BlobEnvelope::LENGTH + usize::from(envelope.length);
        self.respond(length, |bytes| {
            envelope.encode(bytes);
            if let Some(packet) = packet {
                packet.copy_to_slice(0, &mut bytes[BlobEnvelope::LENGTH..]);
            }
        })
    }

    /// Number of responses the channel has not returned yet
    pub fn pending_responses(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().responses)
    }

    /// Number of requests lost to a full request queue
    pub fn dropped_requests(&self) -> u32 {
        self.inner.lock(|inner| inner.borrow().dropped_requests)
    }

    fn write(&self, block: Block<'a>, length: usize) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.responses += 1;
            inner.channel.write(block, 0, length);
        })
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const R: usize> DynamicRx
    for CommandPort<'a, M, C, R>
{
    fn on_received(&self, data: &[u8]) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let Inner {
                parser,
                requests,
                dropped_requests,
                ..
            } = &mut *inner;
            parser.push(&self.pool, data, &mut |result| {
                if requests.push_back(result).is_err() {
                    *dropped_requests = dropped_requests.wrapping_add(1);
                    warn!("command queue full, request dropped");
                }
            });
        })
    }

    fn on_transaction_end(&self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.responses > 0 {
                inner.channel.abort_tx();
            }
            if let Some(error) = inner.parser.transaction_end() {
                inner.post(Err(error));
            }
        })
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const R: usize> DynamicTx<Block<'a>>
    for CommandPort<'a, M, C, R>
{
    fn on_write_complete(&self, buffer: Block<'a>, result: WriteResult) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.responses == 0 {
                warn!("unexpected write completion");
            }
            inner.responses = inner.responses.saturating_sub(1);
            if result == WriteResult::Aborted {
                trace!("response aborted");
            }
        });
        drop(buffer);
    }
}

impl<'a, M: RawMutex, C: ByteChannel<Block<'a>>, const R: usize> DynamicLink<Block<'a>>
    for CommandPort<'a, M, C, R>
{
}
