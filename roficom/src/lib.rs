//! # RoFICoM
//!
//! This library provides the link layer of a RoFICoM connector in no_std environments:
//! a block pool, packet framing over a byte channel, and the connector state machine that
//! gates the link. It uses statically sized pools and queues, requiring no dynamic memory
//! allocation.
//!
//! The library is designed for connector control boards with tight interrupt latency
//! requirements, keeping all critical section durations bounded.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌───────────┐     ┌────────┐
//!  sense inputs ──►│ Connector │◄────┤ Runner │ (timeouts)
//!                  └─────┬─────┘     └────────┘
//!                        │ LinkGate          ConnectorEvent ring ──► application
//!                        ▼
//! ┌──────────┐ Link ┌────────┐  send
//! │ Channel  │◄────►│ Framer │◄────── application
//! │ driver   │      └───┬────┘
//! └──────────┘          │            Event ring ──► application
//!                  ┌────▼────┐
//!                  │  Pool   │
//!                  └─────────┘
//! ```
//! Components:
//! * _Pool_ hands out reference-counted blocks from static size classes. Blocks are the
//!   only memory the stack uses for payloads.
//! * _Framer_ splits outgoing packets into CRC-protected blobs, writes them to the channel
//!   and reassembles incoming blobs into packets. It reports outcomes through an event ring
//!   buffer.
//! * _Link_ is the handle a byte channel driver (SPI/UART) uses to report received bytes,
//!   write completions and transaction boundaries.
//! * _Connector_ runs the mating lifecycle and opens or closes the framer's channel.
//! * _Runner_ is a worker task that fires connector timeouts.
//! * _Command_ holds the encoding of the control protocol spoken with the module controller.
//!
//! ## Concurrency model
//!
//! Driver interrupts, the runner and application code share the framer and the connector
//! through blocking mutexes. There are two mutex implementation options:
//! * _CriticalSectionRawMutex_ allows the driver to report from interrupt handlers, but adds
//!   bounded priority inversion (interrupt latency) to the rest of the system.
//! * _ThreadModeRawMutex_ has no system-wide effects but requires all stack components to run
//!   in thread mode.
//!
//! Critical sections are bounded by the size of the data passed in:
//! * The pool holds its lock only for the free-list pointer swap.
//! * The framer copies received bytes straight into pool blocks and never waits for the
//!   channel. Blob buffers are refilled from write completions.
//! * Events leave the critical section through SPSC ring buffers drained by the application.
//!
//! ## Limitations
//!
//! * No retransmission: a failed packet is reported once and dropped.
//! * Power switching, slider control and measurements are left to board support code.
//! * The no_std target supports single-CPU systems only (embassy_sync limitation).
#![no_std]

pub use roficom_core as core;
pub use roficom_driver::{link, sense, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod command;
pub mod connector;
pub mod format;
pub mod framer;
pub mod packet;
pub mod pool;
pub mod ring_buffer;
