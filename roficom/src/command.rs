//! Command protocol between the module controller and the connector
//!
//! Every transaction starts with a one-byte command code followed by fixed-length
//! arguments. The connector answers within the same transaction.
//!
//! | code | command     | arguments                   | response                         |
//! |------|-------------|-----------------------------|----------------------------------|
//! | 0    | Version     | none                        | variant u16, revision u16        |
//! | 1    | Status      | flags u16, write mask u16   | [`StatusResponse`]               |
//! | 2    | Interrupt   | interrupt mask u16          | pending interrupt flags u16      |
//! | 3    | SendBlob    | none                        | none, the blob envelope follows  |
//! | 4    | ReceiveBlob | none                        | blob envelope, empty if no blob  |
//!
//! Multi-byte fields use native byte order and may be unaligned. A `SendBlob` transaction
//! carries a [`BlobEnvelope`] and the payload after the code. The end of a transaction
//! resets the decoder, a command it cuts short is reported as [`CommandError::Truncated`].
//! [`CommandPort`] decodes the transactions a driver reports through its link and queues
//! one [`Request`] per transaction.

mod parser;
mod port;

pub use parser::{CommandError, Request};
pub use port::CommandPort;

use crate::connector::ConnectorStatus;
use crate::core::{ContentType, InterruptFlags, StatusFlags};
use crate::format::{read_i16, read_u16, write_i16, write_u16};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownCommand(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Version = 0,
    Status = 1,
    Interrupt = 2,
    SendBlob = 3,
    ReceiveBlob = 4,
}

impl Command {
    /// Number of argument bytes following the command code
    pub const fn argument_length(self) -> usize {
        match self {
            Command::Version | Command::SendBlob | Command::ReceiveBlob => 0,
            Command::Status => StatusRequest::LENGTH,
            Command::Interrupt => InterruptRequest::LENGTH,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = UnknownCommand;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Version),
            1 => Ok(Command::Status),
            2 => Ok(Command::Interrupt),
            3 => Ok(Command::SendBlob),
            4 => Ok(Command::ReceiveBlob),
            _ => Err(UnknownCommand(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub variant: u16,
    pub revision: u16,
}

impl Version {
    pub const LENGTH: usize = 4;
    pub const CURRENT: Version = Version {
        variant: 1,
        revision: 1,
    };

    pub fn encode(&self, bytes: &mut [u8]) {
        write_u16(bytes, 0, self.variant);
        write_u16(bytes, 2, self.revision);
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            variant: read_u16(bytes, 0),
            revision: read_u16(bytes, 2),
        }
    }
}

/// Status command arguments: bits to write, selected by a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusRequest {
    pub flags: StatusFlags,
    pub mask: StatusFlags,
}

impl StatusRequest {
    pub const LENGTH: usize = 4;

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            flags: StatusFlags::from_bits(read_u16(bytes, 0)),
            mask: StatusFlags::from_bits(read_u16(bytes, 2)),
        }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        write_u16(bytes, 0, self.flags.into_bits());
        write_u16(bytes, 2, self.mask.into_bits());
    }

    /// Requested slider position, if the request touches it
    pub fn expand(&self) -> Option<bool> {
        self.mask
            .contains(StatusFlags::POSITION_EXPANDED)
            .then(|| self.flags.contains(StatusFlags::POSITION_EXPANDED))
    }
}

/// Power line readings in 8.8 fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements {
    pub internal_voltage: i16,
    pub internal_current: i16,
    pub external_voltage: i16,
    pub external_current: i16,
    /// Distance to the mating side, 0 when unknown
    pub distance: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusResponse {
    pub flags: StatusFlags,
    /// Packets waiting for transmission to the mating side
    pub pending_send: u8,
    /// Packets waiting for the module controller
    pub pending_receive: u8,
    pub measurements: Measurements,
}

impl StatusResponse {
    pub const LENGTH: usize = 14;
    /// Counts saturate below 255, which reads as invalid on the controller side
    const MAX_COUNT: usize = 254;

    /// Merges the connector state into the locally known flags.
    pub fn new(
        local: StatusFlags,
        connector: &ConnectorStatus,
        pending_send: usize,
        pending_receive: usize,
        measurements: Measurements,
    ) -> Self {
        let mut flags = local;
        flags.set_orientation(connector.flags().orientation());
        Self {
            flags,
            pending_send: pending_send.min(Self::MAX_COUNT) as u8,
            pending_receive: pending_receive.min(Self::MAX_COUNT) as u8,
            measurements,
        }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        write_u16(bytes, 0, self.flags.into_bits());
        bytes[2] = self.pending_send;
        bytes[3] = self.pending_receive;
        write_i16(bytes, 4, self.measurements.internal_voltage);
        write_i16(bytes, 6, self.measurements.internal_current);
        write_i16(bytes, 8, self.measurements.external_voltage);
        write_i16(bytes, 10, self.measurements.external_current);
        write_u16(bytes, 12, self.measurements.distance);
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            flags: StatusFlags::from_bits(read_u16(bytes, 0)),
            pending_send: bytes[2],
            pending_receive: bytes[3],
            measurements: Measurements {
                internal_voltage: read_i16(bytes, 4),
                internal_current: read_i16(bytes, 6),
                external_voltage: read_i16(bytes, 8),
                external_current: read_i16(bytes, 10),
                distance: read_u16(bytes, 12),
            },
        }
    }
}

/// Interrupt command arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptRequest {
    /// Interrupt sources the controller wants to be notified about
    pub mask: InterruptFlags,
}

impl InterruptRequest {
    pub const LENGTH: usize = 2;
    pub const RESPONSE_LENGTH: usize = 2;

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            mask: InterruptFlags::from_bits(read_u16(bytes, 0)),
        }
    }

    pub fn encode_response(pending: InterruptFlags, bytes: &mut [u8]) {
        write_u16(bytes, 0, pending.into_bits());
    }
}

/// Header of a blob exchanged with the module controller
///
/// The payload of `length` bytes follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlobEnvelope {
    pub content_type: ContentType,
    pub length: u16,
}

impl BlobEnvelope {
    pub const LENGTH: usize = 4;
    /// Reply to `ReceiveBlob` when nothing is waiting
    pub const EMPTY: BlobEnvelope = BlobEnvelope {
        content_type: ContentType::new(0),
        length: 0,
    };

    pub fn encode(&self, bytes: &mut [u8]) {
        write_u16(bytes, 0, self.content_type.into_u16());
        write_u16(bytes, 2, self.length);
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            content_type: ContentType::new(read_u16(bytes, 0)),
            length: read_u16(bytes, 2),
        }
    }

    /// Checks the declared length against the number of bytes actually transferred
    pub fn matches(&self, transferred: usize) -> bool {
        transferred == Self::LENGTH + usize::from(self.length)
    }
}
