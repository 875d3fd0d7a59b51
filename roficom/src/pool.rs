//! Size-classed pool of reference-counted blocks
//!
//! The pool replaces a general-purpose allocator for interrupt handlers and application code.
//! Capacity is declared statically as a set of [`Bucket`]s, each holding a fixed number of
//! equally sized slots. A request is served by the smallest class that fits. When that class
//! is exhausted, the request fails over to the next larger one.
//!
//! A [`Block`] is a handle to one slot. Cloning the handle retains the slot, dropping it
//! releases the slot. The slot returns to its free list when the last handle is dropped, so
//! reclamation is immediate and deterministic.
//!
//! Each class keeps its own free list behind a blocking mutex. With `CriticalSectionRawMutex`
//! the lock masks interrupts only for the free-list pointer swap, so allocation and release
//! are safe from any execution context and never wait.
//!
//! ## Examples
//!
//! ```
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex as Mutex;
//! use roficom::pool::{Bucket, Pool, SizeClass};
//!
//! static SMALL: Bucket<Mutex, 16, 32> = Bucket::new();
//! static LARGE: Bucket<Mutex, 518, 8> = Bucket::new();
//! static CLASSES: [&(dyn SizeClass + Sync); 2] = [&SMALL, &LARGE];
//!
//! let pool = Pool::new(&CLASSES);
//! let block = pool.allocate(100).unwrap();
//! assert_eq!(block.capacity(), 518);
//! assert_eq!(pool.free_blocks(), 39);
//! drop(block);
//! assert_eq!(pool.free_blocks(), 40);
//! ```

mod bucket;

pub use bucket::{Bucket, MAX_SLOT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AllocError {
    /// All classes able to hold the request are exhausted
    OutOfMemory,
    /// The request exceeds the largest class
    TooLarge,
}

pub(crate) trait SealedSizeClass {
    /// Takes a free slot and sets its reference count to one
    fn acquire(&self) -> Option<u8>;
    fn retain(&self, slot: u8);
    fn release(&self, slot: u8);
    fn ref_count(&self, slot: u8) -> u8;
    fn slot_ptr(&self, slot: u8) -> *mut u8;
}

/// A pool partition of fixed slot size and count
#[allow(private_bounds)]
pub trait SizeClass: SealedSizeClass {
    /// Slot size in bytes
    fn capacity(&self) -> usize;
    fn slot_count(&self) -> usize;
    fn free_count(&self) -> usize;
}

/// Allocator handle over an ascending list of size classes
#[derive(Clone, Copy)]
pub struct Pool<'a> {
    classes: &'a [&'a (dyn SizeClass + Sync)],
}

impl<'a> Pool<'a> {
    /// Creates a pool over the given classes.
    ///
    /// Panics if the list is empty or the capacities are not strictly ascending.
    pub fn new(classes: &'a [&'a (dyn SizeClass + Sync)]) -> Self {
        assert!(!classes.is_empty(), "pool requires at least one size class");
        assert!(
            classes
                .windows(2)
                .all(|pair| pair[0].capacity() < pair[1].capacity()),
            "pool size classes must be ordered by ascending capacity"
        );
        Self { classes }
    }

    /// Allocates a block with at least `size` bytes of capacity.
    pub fn allocate(&self, size: usize) -> Result<Block<'a>, AllocError> {
        let mut capable = self
            .classes
            .iter()
            .filter(|class| class.capacity() >= size)
            .peekable();
        if capable.peek().is_none() {
            return Err(AllocError::TooLarge);
        }

        for &class in capable {
            if let Some(slot) = class.acquire() {
                return Ok(Block { class, slot });
            }
        }
        trace!("pool exhausted for {} bytes", size);
        Err(AllocError::OutOfMemory)
    }

    pub fn max_block_size(&self) -> usize {
        self.classes.last().map_or(0, |class| class.capacity())
    }

    /// Number of free slots across all classes
    pub fn free_blocks(&self) -> usize {
        self.classes.iter().map(|class| class.free_count()).sum()
    }

    pub fn total_blocks(&self) -> usize {
        self.classes.iter().map(|class| class.slot_count()).sum()
    }

    pub fn classes(&self) -> &'a [&'a (dyn SizeClass + Sync)] {
        self.classes
    }
}

/// Reference-counted handle to a pool slot
///
/// `Clone` increments the reference count, `Drop` decrements it. The bytes are readable through
/// any handle. Mutable access requires the handle to be the only one.
pub struct Block<'a> {
    class: &'a (dyn SizeClass + Sync),
    slot: u8,
}

impl<'a> Block<'a> {
    pub fn capacity(&self) -> usize {
        self.class.capacity()
    }

    pub fn ref_count(&self) -> usize {
        usize::from(self.class.ref_count(self.slot))
    }

    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    /// Returns the bytes for writing if no other handle to the slot exists.
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_unique() {
            // Safety: the handle is the only reference to the slot and it is borrowed mutably
            Some(unsafe {
                core::slice::from_raw_parts_mut(self.class.slot_ptr(self.slot), self.capacity())
            })
        } else {
            None
        }
    }

    /// Checks whether two handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Block<'_>) -> bool {
        core::ptr::addr_eq(self.class, other.class) && self.slot == other.slot
    }
}

impl core::ops::Deref for Block<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // Safety: the slot stays allocated while this handle exists. Writers need a unique
        // handle, so no mutable reference can coexist with this one.
        unsafe { core::slice::from_raw_parts(self.class.slot_ptr(self.slot), self.capacity()) }
    }
}

impl Clone for Block<'_> {
    fn clone(&self) -> Self {
        self.class.retain(self.slot);
        Self {
            class: self.class,
            slot: self.slot,
        }
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        self.class.release(self.slot);
    }
}

impl core::fmt::Debug for Block<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity())
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Block<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Block {{ capacity: {}, slot: {} }}", self.capacity(), self.slot)
    }
}
