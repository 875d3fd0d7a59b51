use super::{SealedSizeClass, SizeClass};
use core::cell::{RefCell, UnsafeCell};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

const NO_SLOT: u8 = u8::MAX;

/// Maximal number of slots in a single bucket
///
/// Slot indices stay below `NO_SLOT`, which terminates the free list.
pub const MAX_SLOT_COUNT: usize = NO_SLOT as usize;

/// Size class with `COUNT` slots of `SIZE` bytes
///
/// Free slots form an intrusive list: the first byte of a free slot holds the index of the
/// next free slot. Slots beyond the watermark were never handed out and are not linked yet,
/// which keeps `new` a cheap `const fn` usable in statics.
pub struct Bucket<M: RawMutex, const SIZE: usize, const COUNT: usize> {
    storage: UnsafeCell<[[u8; SIZE]; COUNT]>,
    state: Mutex<M, RefCell<State<COUNT>>>,
}

struct State<const COUNT: usize> {
    free_head: u8,
    watermark: u8,
    used: u8,
    ref_counts: [u8; COUNT],
}

// Safety: slot bytes are written either by the unique holder of a block or, for the free-list
// link, under the state lock while no block refers to the slot.
unsafe impl<M: RawMutex + Sync, const SIZE: usize, const COUNT: usize> Sync
    for Bucket<M, SIZE, COUNT>
{
}

impl<M: RawMutex, const SIZE: usize, const COUNT: usize> Bucket<M, SIZE, COUNT> {
    pub const fn new() -> Self {
        const {
            ::core::assert!(SIZE >= 1, "bucket slot must hold at least one byte");
            ::core::assert!(COUNT >= 1, "bucket must hold at least one slot");
            ::core::assert!(COUNT <= MAX_SLOT_COUNT, "bucket slot count exceeds the limit");
        }
        Self {
            storage: UnsafeCell::new([[0; SIZE]; COUNT]),
            state: Mutex::new(RefCell::new(State {
                free_head: NO_SLOT,
                watermark: 0,
                used: 0,
                ref_counts: [0; COUNT],
            })),
        }
    }
}

impl<M: RawMutex, const SIZE: usize, const COUNT: usize> Default for Bucket<M, SIZE, COUNT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const SIZE: usize, const COUNT: usize> SealedSizeClass
    for Bucket<M, SIZE, COUNT>
{
    fn acquire(&self) -> Option<u8> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let slot = if state.free_head != NO_SLOT {
                let slot = state.free_head;
                // Safety: the slot is on the free list, no block refers to it
                state.free_head = unsafe { *self.slot_ptr(slot) };
                slot
            } else if usize::from(state.watermark) < COUNT {
                let slot = state.watermark;
                state.watermark += 1;
                slot
            } else {
                return None;
            };
            state.ref_counts[usize::from(slot)] = 1;
            state.used += 1;
            Some(slot)
        })
    }

    fn retain(&self, slot: u8) {
        self.state.lock(|state| {
            let state = &mut *state.borrow_mut();
            let count = &mut state.ref_counts[usize::from(slot)];
            assert!(*count != 0, "retain of a released block");
            *count = match count.checked_add(1) {
                Some(count) => count,
                None => panic!("block reference count overflow"),
            };
        })
    }

    fn release(&self, slot: u8) {
        self.state.lock(|state| {
            let state = &mut *state.borrow_mut();
            let count = &mut state.ref_counts[usize::from(slot)];
            assert!(*count != 0, "double release of a block");
            *count -= 1;
            if *count == 0 {
                // Safety: the last handle is gone, the slot belongs to the free list now
                unsafe { *self.slot_ptr(slot) = state.free_head };
                state.free_head = slot;
                state.used -= 1;
            }
        })
    }

    fn ref_count(&self, slot: u8) -> u8 {
        self.state
            .lock(|state| state.borrow().ref_counts[usize::from(slot)])
    }

    fn slot_ptr(&self, slot: u8) -> *mut u8 {
        debug_assert!(usize::from(slot) < COUNT);
        // Safety: the slot index is within the storage
        unsafe {
            self.storage
                .get()
                .cast::<u8>()
                .add(usize::from(slot) * SIZE)
        }
    }
}

impl<M: RawMutex, const SIZE: usize, const COUNT: usize> SizeClass for Bucket<M, SIZE, COUNT> {
    fn capacity(&self) -> usize {
        SIZE
    }

    fn slot_count(&self) -> usize {
        COUNT
    }

    fn free_count(&self) -> usize {
        self.state
            .lock(|state| COUNT - usize::from(state.borrow().used))
    }
}
