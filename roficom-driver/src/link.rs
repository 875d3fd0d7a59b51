//! Contract between a byte channel driver and the stack

use crate::internal;

/// Outcome of a single `ByteChannel::write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteResult {
    /// The number of bytes actually shifted out
    Written(usize),
    /// The transfer was cancelled, e.g. the partner reset the transaction
    Aborted,
}

/// Byte transport operated by the stack
///
/// `B` is the buffer handle type the stack lends to the driver for the duration of a write.
///
/// Drivers must guarantee:
/// * exactly one completion (`Link::write_complete`) per `write`, including aborted writes,
/// * completions are reported in the order writes were issued,
/// * no completion is reported from within `write` itself.
pub trait ByteChannel<B> {
    /// Enables reception and transmission.
    fn enable(&mut self);

    /// Disables the channel. Pending writes still complete (as aborted).
    fn disable(&mut self);

    /// Starts transmitting `length` bytes of `buffer` starting at `offset`.
    ///
    /// The buffer is returned with the completion.
    fn write(&mut self, buffer: B, offset: usize, length: usize);

    /// Cancels the reception in progress and drops buffered input.
    fn abort_rx(&mut self);

    /// Cancels the transmission in progress.
    fn abort_tx(&mut self);
}

/// Driver-side handle reporting channel events to the stack
///
/// The handle is cheap to copy, so receive and transmit interrupt handlers may hold
/// their own instance.
pub struct Link<'a, B>(&'a (dyn internal::DynamicLink<B> + Sync));

impl<'a, B> Link<'a, B> {
    pub fn new(access: &'a (dyn internal::DynamicLink<B> + Sync)) -> Self {
        Self(access)
    }

    /// Pushes received bytes. The slice may hold any part of the byte stream.
    pub fn received(&self, data: &[u8]) {
        self.0.on_received(data);
    }

    /// Returns the buffer of the oldest pending write together with its outcome.
    pub fn write_complete(&self, buffer: B, result: WriteResult) {
        self.0.on_write_complete(buffer, result);
    }

    /// Reports the end of a transaction (e.g. chip-select release).
    pub fn transaction_end(&self) {
        self.0.on_transaction_end();
    }
}

impl<B> Clone for Link<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Link<'_, B> {}
