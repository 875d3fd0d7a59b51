use super::LinkError;
use crate::format::{self, BlobHeader, HEADER_LENGTH};
use crate::packet::{Chunk, Packet};
use crate::pool::{Block, Pool};

/// Observable state of the receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// Waiting for (the rest of) a blob header
    ExpectHeader,
    /// Inside a blob, `remaining` bytes of payload and CRC to go
    ExpectPayload { remaining: usize },
    /// Ignoring input until the transaction ends
    Discard,
}

pub(crate) enum Output<'a> {
    /// A valid blob was accepted
    Blob,
    Packet(Packet<'a>),
    Fault(LinkError),
}

enum State<'a> {
    ExpectHeader {
        bytes: [u8; HEADER_LENGTH],
        filled: usize,
    },
    ExpectPayload {
        blob: Block<'a>,
        header: BlobHeader,
        filled: usize,
    },
    Discard,
}

impl State<'_> {
    const fn idle() -> Self {
        Self::ExpectHeader {
            bytes: [0; HEADER_LENGTH],
            filled: 0,
        }
    }
}

/// Reassembles packets from the inbound byte stream
pub(crate) struct Gather<'a> {
    state: State<'a>,
    packet: Option<Packet<'a>>,
    max_payload: usize,
    max_packet_length: usize,
}

impl<'a> Gather<'a> {
    pub fn new(max_payload: usize, max_packet_length: usize) -> Self {
        Self {
            state: State::idle(),
            packet: None,
            max_payload,
            max_packet_length,
        }
    }

    pub fn state(&self) -> RxState {
        match &self.state {
            State::ExpectHeader { .. } => RxState::ExpectHeader,
            State::ExpectPayload { header, filled, .. } => RxState::ExpectPayload {
                remaining: header.blob_length() - filled,
            },
            State::Discard => RxState::Discard,
        }
    }

    /// Checks whether a multi-blob packet is partially received
    pub fn is_assembling(&self) -> bool {
        self.packet.is_some()
    }

    pub fn push(
        &mut self,
        pool: &Pool<'a>,
        mut data: &[u8],
        sink: &mut impl FnMut(Output<'a>),
    ) {
        while !data.is_empty() {
            let consumed = match self.state {
                State::Discard => data.len(),
                State::ExpectHeader { .. } => self.push_header(pool, data, sink),
                State::ExpectPayload { .. } => self.push_payload(data, sink),
            };
            data = &data[consumed..];
        }
    }

    /// Resynchronizes on a transaction boundary.
    ///
    /// Returns `ChannelAborted` if the boundary cut a blob.
    pub fn transaction_end(&mut self) -> Option<LinkError> {
        let cut = match &self.state {
            State::ExpectHeader { filled, .. } => *filled > 0,
            State::ExpectPayload { .. } => true,
            State::Discard => false,
        };
        self.state = State::idle();
        if cut {
            self.packet = None;
            Some(LinkError::ChannelAborted)
        } else {
            None
        }
    }

    /// Drops the blob and the packet under reassembly
    pub fn reset(&mut self) {
        self.state = State::idle();
        self.packet = None;
    }

    fn push_header(
        &mut self,
        pool: &Pool<'a>,
        data: &[u8],
        sink: &mut impl FnMut(Output<'a>),
    ) -> usize {
        let State::ExpectHeader { bytes, filled } = &mut self.state else {
            unreachable!()
        };
        let count = (HEADER_LENGTH - *filled).min(data.len());
        bytes[*filled..*filled + count].copy_from_slice(&data[..count]);
        *filled += count;

        if *filled == HEADER_LENGTH {
            let header = BlobHeader::from_bytes(*bytes);
            self.start_blob(pool, header, sink);
        }
        count
    }

    fn start_blob(
        &mut self,
        pool: &Pool<'a>,
        header: BlobHeader,
        sink: &mut impl FnMut(Output<'a>),
    ) {
        if header.length() > self.max_payload || (header.more() && header.length() == 0) {
            return self.fail(LinkError::LengthOutOfRange, sink);
        }
        let mut blob = match pool.allocate(header.blob_length()) {
            Ok(blob) => blob,
            Err(_) => return self.fail(LinkError::OutOfMemory, sink),
        };
        unwrap!(blob.get_mut())[..HEADER_LENGTH].copy_from_slice(&header.to_bytes());
        self.state = State::ExpectPayload {
            blob,
            header,
            filled: HEADER_LENGTH,
        };
    }

    fn push_payload(&mut self, data: &[u8], sink: &mut impl FnMut(Output<'a>)) -> usize {
        let State::ExpectPayload {
            blob,
            header,
            filled,
        } = &mut self.state
        else {
            unreachable!()
        };
        let count = (header.blob_length() - *filled).min(data.len());
        unwrap!(blob.get_mut())[*filled..*filled + count].copy_from_slice(&data[..count]);
        *filled += count;

        if *filled == header.blob_length() {
            self.finish_blob(sink);
        }
        count
    }

    fn finish_blob(&mut self, sink: &mut impl FnMut(Output<'a>)) {
        let State::ExpectPayload { blob, header, .. } =
            core::mem::replace(&mut self.state, State::idle())
        else {
            unreachable!()
        };
        if !format::verify_blob(&blob, header) {
            return self.fail(LinkError::CrcMismatch, sink);
        }

        let mut packet = self.packet.take().unwrap_or_default();
        if packet.len() + header.length() > self.max_packet_length {
            return self.fail(LinkError::LengthOutOfRange, sink);
        }
        let payload = Chunk::new(blob, HEADER_LENGTH..HEADER_LENGTH + header.length());
        if packet.push_chunk(payload).is_err() {
            return self.fail(LinkError::LengthOutOfRange, sink);
        }

        sink(Output::Blob);
        if header.more() {
            self.packet = Some(packet);
        } else {
            sink(Output::Packet(packet));
        }
    }

    fn fail(&mut self, error: LinkError, sink: &mut impl FnMut(Output<'a>)) {
        self.state = State::Discard;
        self.packet = None;
        sink(Output::Fault(error));
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::format::{OVERHEAD, seal_blob};
    use crate::pool::{Bucket, SizeClass};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::boxed::Box;
    use std::vec::Vec;

    fn make_pool() -> Pool<'static> {
        let bucket: &'static Bucket<CriticalSectionRawMutex, 32, 8> =
            Box::leak(Box::new(Bucket::new()));
        let classes: &'static [&'static (dyn SizeClass + Sync)] =
            Box::leak(Box::new([bucket as &(dyn SizeClass + Sync)]));
        Pool::new(classes)
    }

    fn blob(payload: &[u8], more: bool) -> Vec<u8> {
        let header = BlobHeader::new(payload.len(), more);
        let mut bytes = std::vec![0u8; OVERHEAD + payload.len()];
        bytes[..2].copy_from_slice(&header.to_bytes());
        bytes[2..2 + payload.len()].copy_from_slice(payload);
        seal_blob(&mut bytes, header);
        bytes
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Blob,
        Packet(Vec<u8>),
        Fault(LinkError),
    }

    fn feed(gather: &mut Gather<'static>, pool: &Pool<'static>, data: &[u8]) -> Vec<Seen> {
        let mut seen = Vec::new();
        gather.push(pool, data, &mut |output| {
            seen.push(match output {
                Output::Blob => Seen::Blob,
                Output::Packet(packet) => Seen::Packet(packet.chunks().flatten().copied().collect()),
                Output::Fault(error) => Seen::Fault(error),
            })
        });
        seen
    }

    #[test]
    fn test_byte_by_byte() {
        let pool = make_pool();
        let mut gather = Gather::new(10, 64);
        let bytes = blob(b"Hello worl", false);

        let mut seen = Vec::new();
        for (i, byte) in bytes.iter().enumerate() {
            if i >= HEADER_LENGTH {
                assert_eq!(
                    gather.state(),
                    RxState::ExpectPayload {
                        remaining: bytes.len() - i
                    }
                );
            }
            seen.extend(feed(&mut gather, &pool, core::slice::from_ref(byte)));
        }
        assert_eq!(seen, [Seen::Blob, Seen::Packet(b"Hello worl".to_vec())]);
        assert_eq!(gather.state(), RxState::ExpectHeader);
        assert_eq!(pool.free_blocks(), 8);
    }

    #[test]
    fn test_multi_blob_packet() {
        let pool = make_pool();
        let mut gather = Gather::new(4, 64);
        let mut stream = blob(b"abcd", true);
        stream.extend(blob(b"efgh", true));
        stream.extend(blob(b"ij", false));

        let seen = feed(&mut gather, &pool, &stream);
        assert_eq!(
            seen,
            [
                Seen::Blob,
                Seen::Blob,
                Seen::Blob,
                Seen::Packet(b"abcdefghij".to_vec())
            ]
        );
    }

    #[test]
    fn test_crc_mismatch_discards_until_transaction_end() {
        let pool = make_pool();
        let mut gather = Gather::new(10, 64);
        let mut bytes = blob(b"Hello worl", false);
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);

        let mut stream = bytes.clone();
        stream.extend(blob(b"ok", false));
        assert_eq!(
            feed(&mut gather, &pool, &stream),
            [Seen::Fault(LinkError::CrcMismatch)]
        );
        assert_eq!(gather.state(), RxState::Discard);

        assert_eq!(gather.transaction_end(), None);
        assert_eq!(
            feed(&mut gather, &pool, &blob(b"ok", false)),
            [Seen::Blob, Seen::Packet(b"ok".to_vec())]
        );
        assert_eq!(pool.free_blocks(), 8);
    }

    #[test]
    fn test_length_out_of_range() {
        let pool = make_pool();
        let mut gather = Gather::new(4, 6);

        assert_eq!(
            feed(&mut gather, &pool, &blob(b"abcde", false)),
            [Seen::Fault(LinkError::LengthOutOfRange)]
        );
        gather.transaction_end();

        assert_eq!(
            feed(&mut gather, &pool, &blob(b"", true)),
            [Seen::Fault(LinkError::LengthOutOfRange)]
        );
        gather.transaction_end();

        let mut stream = blob(b"abcd", true);
        stream.extend(blob(b"efgh", false));
        assert_eq!(
            feed(&mut gather, &pool, &stream),
            [Seen::Blob, Seen::Fault(LinkError::LengthOutOfRange)]
        );
        assert!(!gather.is_assembling());
        gather.transaction_end();
        assert_eq!(pool.free_blocks(), 8);
    }

    #[test]
    fn test_out_of_memory() {
        let pool = make_pool();
        let held: Vec<_> = (0..8).map(|_| pool.allocate(1).unwrap()).collect();
        let mut gather = Gather::new(10, 64);
        assert_eq!(
            feed(&mut gather, &pool, &blob(b"abc", false)),
            [Seen::Fault(LinkError::OutOfMemory)]
        );
        drop(held);
    }

    #[test]
    fn test_transaction_end() {
        let pool = make_pool();
        let mut gather = Gather::new(4, 64);

        // boundary between blobs keeps the packet
        assert_eq!(feed(&mut gather, &pool, &blob(b"abcd", true)), [Seen::Blob]);
        assert_eq!(gather.transaction_end(), None);
        assert_eq!(gather.transaction_end(), None);
        assert!(gather.is_assembling());
        assert_eq!(
            feed(&mut gather, &pool, &blob(b"ef", false)),
            [Seen::Blob, Seen::Packet(b"abcdef".to_vec())]
        );

        // boundary inside a blob aborts the packet
        let first = blob(b"abcd", true);
        feed(&mut gather, &pool, &first);
        let second = blob(b"ef", false);
        feed(&mut gather, &pool, &second[..3]);
        assert_eq!(gather.transaction_end(), Some(LinkError::ChannelAborted));
        assert_eq!(gather.transaction_end(), None);
        assert!(!gather.is_assembling());
        assert_eq!(gather.state(), RxState::ExpectHeader);
        assert_eq!(pool.free_blocks(), 8);

        // half a header counts as a cut blob
        feed(&mut gather, &pool, &second[..1]);
        assert_eq!(gather.transaction_end(), Some(LinkError::ChannelAborted));
    }
}
