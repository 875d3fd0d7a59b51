//! RoFICoM driver interface
//!
//! The crate provides an interface between byte channel (SPI/UART) or sensor drivers and the
//! RoFICoM stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Stack users should depend on the `roficom`
//! crate instead.
//!
//! A byte channel driver sits between two halves of the link:
//! * the stack drives the channel through the [`link::ByteChannel`] trait (enable, write,
//!   abort),
//! * the driver reports back through a [`link::Link`] handle from its interrupt handlers
//!   (received bytes, write completions, transaction boundaries).
//!
//! Transactions are delimited out-of-band, e.g. by a chip-select edge on SPI or an idle line
//! on UART. The stack uses the boundary to resynchronize its receiver, so drivers must report
//! every boundary they observe.
//!
//! The stack keeps its state behind a critical section. Drivers must not report events
//! synchronously from within `ByteChannel` methods. Completions are expected to arrive later
//! from interrupt context.

#![no_std]

pub mod internal;
pub mod link;
pub mod sense;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
