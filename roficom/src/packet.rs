//! Application packets
//!
//! A [`Packet`] is a chain of byte ranges within pool blocks. Chaining lets the stack add a
//! prefix or pass received blobs to the application without copying payload bytes.

use crate::pool::{AllocError, Block, Pool};
use core::ops::Range;

/// Maximal number of chunks in a packet
pub const MAX_CHUNKS: usize = 8;

/// Byte range within a block
#[derive(Clone, Debug)]
pub struct Chunk<'a> {
    block: Block<'a>,
    range: Range<usize>,
}

impl<'a> Chunk<'a> {
    pub fn new(block: Block<'a>, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= block.capacity(),
            "chunk range exceeds the block"
        );
        Self { block, range }
    }

    pub fn block(&self) -> &Block<'a> {
        &self.block
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.block[self.range.clone()]
    }
}

/// Chained byte sequence
#[derive(Clone, Default)]
pub struct Packet<'a> {
    chunks: heapless::Vec<Chunk<'a>, MAX_CHUNKS>,
    len: usize,
}

impl<'a> Packet<'a> {
    pub const fn new() -> Self {
        Self {
            chunks: heapless::Vec::new(),
            len: 0,
        }
    }

    pub fn from_block(block: Block<'a>, range: Range<usize>) -> Self {
        let mut packet = Self::new();
        if packet.push_chunk(Chunk::new(block, range)).is_err() {
            unreachable!();
        }
        packet
    }

    /// Copies `data` into freshly allocated blocks.
    ///
    /// Data larger than the biggest size class is spread over several blocks.
    pub fn from_slice(pool: &Pool<'a>, data: &[u8]) -> Result<Self, AllocError> {
        let block_size = pool.max_block_size();
        if data.len().div_ceil(block_size) > MAX_CHUNKS {
            return Err(AllocError::TooLarge);
        }

        let mut packet = Self::new();
        for part in data.chunks(block_size) {
            let mut block = pool.allocate(part.len())?;
            unwrap!(block.get_mut())[..part.len()].copy_from_slice(part);
            if packet.push_chunk(Chunk::new(block, 0..part.len())).is_err() {
                unreachable!();
            }
        }
        Ok(packet)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Appends a chunk, returning it back if the chunk limit is reached
    pub fn push_chunk(&mut self, chunk: Chunk<'a>) -> Result<(), Chunk<'a>> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len();
        self.chunks.push(chunk)?;
        self.len += len;
        Ok(())
    }

    /// Prepends a chunk, returning it back if the chunk limit is reached
    pub fn push_front_chunk(&mut self, chunk: Chunk<'a>) -> Result<(), Chunk<'a>> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len();
        self.chunks.insert(0, chunk)?;
        self.len += len;
        Ok(())
    }

    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Chunk::as_slice)
    }

    /// Copies bytes starting at `offset` into `dst`, returning the number of bytes copied
    pub fn copy_to_slice(&self, offset: usize, dst: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut copied = 0;
        for chunk in self.chunks() {
            if copied == dst.len() {
                break;
            }
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let part = &chunk[skip..];
            skip = 0;
            let count = part.len().min(dst.len() - copied);
            dst[copied..copied + count].copy_from_slice(&part[..count]);
            copied += count;
        }
        copied
    }

    /// Drops the leading `count` bytes.
    ///
    /// Blocks fully consumed are released.
    pub fn advance(&mut self, count: usize) {
        assert!(count <= self.len, "advance past the packet end");
        self.len -= count;
        let mut remaining = count;
        while remaining > 0 {
            let front = &mut self.chunks[0];
            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.remove(0);
            } else {
                front.range.start += remaining;
                remaining = 0;
            }
        }
    }

    /// Compares packet content with a contiguous slice
    pub fn content_eq(&self, other: &[u8]) -> bool {
        if self.len != other.len() {
            return false;
        }
        let mut rest = other;
        for chunk in self.chunks() {
            let (head, tail) = rest.split_at(chunk.len());
            if head != chunk {
                return false;
            }
            rest = tail;
        }
        true
    }
}

impl core::fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Packet<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Packet {{ len: {}, chunks: {} }}",
            self.len,
            self.chunks.len()
        )
    }
}
