//! Bounded FIFO queues between execution contexts
//!
//! [`RingBuffer`] keeps one storage slot empty to tell full from empty, so a buffer with
//! `N` slots holds at most `N - 1` items. Pushing into a full buffer returns the item back
//! to the caller and leaves the contents untouched.
//!
//! [`RingBuffer::split`] hands out a [`Producer`] and a [`Consumer`] that may live in
//! different contexts, e.g. an interrupt handler and the application loop. Each side owns
//! its own index, so no locking is involved.

use heapless::spsc;

pub struct RingBuffer<T, const N: usize> {
    queue: spsc::Queue<T, N>,
}

impl<T, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> Self {
        Self {
            queue: spsc::Queue::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Appends an item, returning it back if the buffer is full
    pub fn push_back(&mut self, item: T) -> Result<(), T> {
        self.queue.enqueue(item)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.queue.dequeue()
    }

    pub fn front(&self) -> Option<&T> {
        self.queue.peek()
    }

    /// Drops all queued items
    pub fn clear(&mut self) {
        while self.queue.dequeue().is_some() {}
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.queue.iter()
    }

    /// Splits the buffer into a producer and a consumer end.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        let (producer, consumer) = self.queue.split();
        (Producer { inner: producer }, Consumer { inner: consumer })
    }
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pushing end of a split [`RingBuffer`]
pub struct Producer<'a, T, const N: usize> {
    inner: spsc::Producer<'a, T, N>,
}

impl<T, const N: usize> Producer<'_, T, N> {
    pub fn push_back(&mut self, item: T) -> Result<(), T> {
        self.inner.enqueue(item)
    }

    pub fn is_full(&self) -> bool {
        !self.inner.ready()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

/// Popping end of a split [`RingBuffer`]
pub struct Consumer<'a, T, const N: usize> {
    inner: spsc::Consumer<'a, T, N>,
}

impl<T, const N: usize> Consumer<'_, T, N> {
    pub fn pop_front(&mut self) -> Option<T> {
        self.inner.dequeue()
    }

    pub fn front(&self) -> Option<&T> {
        self.inner.peek()
    }

    pub fn is_empty(&self) -> bool {
        !self.inner.ready()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Pops the oldest item and passes it to `job`.
    ///
    /// Returns `false` without calling `job` if the buffer is empty.
    pub fn run_once(&mut self, job: impl FnOnce(T)) -> bool {
        match self.inner.dequeue() {
            Some(item) => {
                job(item);
                true
            }
            None => false,
        }
    }

    /// Runs queued jobs until the buffer is empty, returning the number of jobs run.
    pub fn run_all(&mut self, mut job: impl FnMut(T)) -> usize {
        let mut count = 0;
        while self.run_once(&mut job) {
            count += 1;
        }
        count
    }
}
