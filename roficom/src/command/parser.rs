use core::mem::replace;

use super::{BlobEnvelope, Command, InterruptRequest, StatusRequest, UnknownCommand};
use crate::core::ContentType;
use crate::packet::Packet;
use crate::pool::{Block, Pool};

const MAX_ARGUMENT_LENGTH: usize = 4;

/// Decoded controller command
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request<'a> {
    Version,
    Status(StatusRequest),
    Interrupt(InterruptRequest),
    ReceiveBlob,
    /// Blob written by the controller after `SendBlob`
    SendBlob {
        content_type: ContentType,
        packet: Packet<'a>,
    },
}

impl Request<'_> {
    pub fn command(&self) -> Command {
        match self {
            Request::Version => Command::Version,
            Request::Status(_) => Command::Status,
            Request::Interrupt(_) => Command::Interrupt,
            Request::ReceiveBlob => Command::ReceiveBlob,
            Request::SendBlob { .. } => Command::SendBlob,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    Unknown(UnknownCommand),
    /// The transaction ended before the command was complete
    Truncated(Command),
    /// The blob envelope declares more than the blob limit
    BlobTooLong,
    OutOfMemory,
}

enum State<'a> {
    ExpectCode,
    Arguments {
        command: Command,
        bytes: [u8; MAX_ARGUMENT_LENGTH],
        filled: usize,
    },
    Envelope {
        bytes: [u8; BlobEnvelope::LENGTH],
        filled: usize,
    },
    Payload {
        envelope: BlobEnvelope,
        block: Block<'a>,
        transferred: usize,
    },
    /// The command is handled, the rest of the transaction is ignored
    Done,
}

/// Splits a transaction into the command code, its arguments and the blob that follows
/// `SendBlob`
pub(crate) struct Parser<'a> {
    state: State<'a>,
    blob_limit: usize,
}

impl<'a> Parser<'a> {
    pub const fn new(blob_limit: usize) -> Self {
        Self {
            state: State::ExpectCode,
            blob_limit,
        }
    }

    pub fn blob_limit(&self) -> usize {
        self.blob_limit
    }

    pub fn push(
        &mut self,
        pool: &Pool<'a>,
        mut data: &[u8],
        sink: &mut impl FnMut(Result<Request<'a>, CommandError>),
    ) {
        while let Some((&first, rest)) = data.split_first() {
            match &mut self.state {
                State::ExpectCode => {
                    data = rest;
                    self.start(first, sink);
                }
                State::Arguments {
                    command,
                    bytes,
                    filled,
                } => {
                    let length = command.argument_length();
                    let take = (length - *filled).min(data.len());
                    bytes[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];
                    if *filled == length {
                        let request = match command {
                            Command::Status => {
                                Request::Status(StatusRequest::decode(&bytes[..]))
                            }
                            Command::Interrupt => {
                                Request::Interrupt(InterruptRequest::decode(&bytes[..]))
                            }
                            _ => unreachable!(),
                        };
                        self.finish(Ok(request), sink);
                    }
                }
                State::Envelope { bytes, filled } => {
                    let take = (BlobEnvelope::LENGTH - *filled).min(data.len());
                    bytes[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];
                    if *filled == BlobEnvelope::LENGTH {
                        let envelope = BlobEnvelope::decode(&bytes[..]);
                        self.start_payload(pool, envelope, sink);
                    }
                }
                State::Payload {
                    envelope,
                    block,
                    transferred,
                } => {
                    let offset = *transferred - BlobEnvelope::LENGTH;
                    let take = (usize::from(envelope.length) - offset).min(data.len());
                    unwrap!(block.get_mut())[offset..offset + take].copy_from_slice(&data[..take]);
                    *transferred += take;
                    data = &data[take..];
                    if envelope.matches(*transferred) {
                        self.finish_payload(sink);
                    }
                }
                State::Done => return,
            }
        }
    }

    /// Resets on a transaction boundary.
    ///
    /// Returns `Truncated` if the boundary cut a command.
    pub fn transaction_end(&mut self) -> Option<CommandError> {
        let cut = match &self.state {
            State::ExpectCode | State::Done => None,
            State::Arguments { command, .. } => Some(*command),
            State::Envelope { .. } | State::Payload { .. } => Some(Command::SendBlob),
        };
        self.state = State::ExpectCode;
        cut.map(CommandError::Truncated)
    }

    fn start(&mut self, code: u8, sink: &mut impl FnMut(Result<Request<'a>, CommandError>)) {
        let command = match Command::try_from(code) {
            Ok(command) => command,
            Err(error) => return self.finish(Err(CommandError::Unknown(error)), sink),
        };
        trace!("command {:?}", command);
        match command {
            Command::Version => self.finish(Ok(Request::Version), sink),
            Command::ReceiveBlob => self.finish(Ok(Request::ReceiveBlob), sink),
            Command::SendBlob => {
                self.state = State::Envelope {
                    bytes: [0; BlobEnvelope::LENGTH],
                    filled: 0,
                }
            }
            Command::Status | Command::Interrupt => {
                self.state = State::Arguments {
                    command,
                    bytes: [0; MAX_ARGUMENT_LENGTH],
                    filled: 0,
                }
            }
        }
    }

    fn start_payload(
        &mut self,
        pool: &Pool<'a>,
        envelope: BlobEnvelope,
        sink: &mut impl FnMut(Result<Request<'a>, CommandError>),
    ) {
        let length = usize::from(envelope.length);
        if length > self.blob_limit {
            return self.finish(Err(CommandError::BlobTooLong), sink);
        }
        if length == 0 {
            let request = Request::SendBlob {
                content_type: envelope.content_type,
                packet: Packet::new(),
            };
            return self.finish(Ok(request), sink);
        }
        match pool.allocate(length) {
            Ok(block) => {
                self.state = State::Payload {
                    envelope,
                    block,
                    transferred: BlobEnvelope::LENGTH,
                }
            }
            Err(_) => self.finish(Err(CommandError::OutOfMemory), sink),
        }
    }

    fn finish_payload(&mut self, sink: &mut impl FnMut(Result<Request<'a>, CommandError>)) {
        let State::Payload {
            envelope, block, ..
        } = replace(&mut self.state, State::Done)
        else {
            unreachable!()
        };
        let request = Request::SendBlob {
            content_type: envelope.content_type,
            packet: Packet::from_block(block, 0..usize::from(envelope.length)),
        };
        sink(Ok(request));
    }

    fn finish(
        &mut self,
        result: Result<Request<'a>, CommandError>,
        sink: &mut impl FnMut(Result<Request<'a>, CommandError>),
    ) {
        self.state = State::Done;
        sink(result);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::core::StatusFlags;
    use crate::pool::{Bucket, SizeClass};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::boxed::Box;
    use std::vec::Vec;

    fn make_pool() -> Pool<'static> {
        let bucket: &'static Bucket<CriticalSectionRawMutex, 16, 4> =
            Box::leak(Box::new(Bucket::new()));
        let classes: &'static [&'static (dyn SizeClass + Sync)] =
            Box::leak(Box::new([bucket as &(dyn SizeClass + Sync)]));
        Pool::new(classes)
    }

    fn feed<'a>(
        parser: &mut Parser<'a>,
        pool: &Pool<'a>,
        data: &[u8],
    ) -> Vec<Result<Request<'a>, CommandError>> {
        let mut results = Vec::new();
        parser.push(pool, data, &mut |result| results.push(result));
        results
    }

    #[test]
    fn test_split_arguments() {
        let pool = make_pool();
        let mut parser = Parser::new(16);
        let mut bytes = [0u8; 5];
        bytes[0] = Command::Status as u8;
        StatusRequest {
            flags: StatusFlags::POSITION_EXPANDED,
            mask: StatusFlags::POSITION_EXPANDED,
        }
        .encode(&mut bytes[1..]);

        assert!(feed(&mut parser, &pool, &bytes[..2]).is_empty());
        let results = feed(&mut parser, &pool, &bytes[2..]);
        assert!(matches!(
            results[..],
            [Ok(Request::Status(request))] if request.expand() == Some(true)
        ));
        // trailing bytes of the transaction belong to the response
        assert!(feed(&mut parser, &pool, &[0, 0]).is_empty());
        assert_eq!(parser.transaction_end(), None);
    }

    #[test]
    fn test_commands_without_arguments() {
        let pool = make_pool();
        let mut parser = Parser::new(16);
        let results = feed(&mut parser, &pool, &[Command::Version as u8, 4]);
        assert!(matches!(results[..], [Ok(Request::Version)]));
        parser.transaction_end();

        let results = feed(&mut parser, &pool, &[Command::ReceiveBlob as u8]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().map(Request::command), Ok(Command::ReceiveBlob));
    }

    #[test]
    fn test_unknown_command() {
        let pool = make_pool();
        let mut parser = Parser::new(16);
        let results = feed(&mut parser, &pool, &[9, Command::Version as u8]);
        assert!(matches!(
            results[..],
            [Err(CommandError::Unknown(UnknownCommand(9)))]
        ));
        assert_eq!(parser.transaction_end(), None);
    }

    #[test]
    fn test_send_blob() {
        let pool = make_pool();
        let total = pool.free_blocks();
        let mut parser = Parser::new(16);
        let mut bytes = [0u8; 1 + BlobEnvelope::LENGTH + 5];
        bytes[0] = Command::SendBlob as u8;
        BlobEnvelope {
            content_type: ContentType::new(7),
            length: 5,
        }
        .encode(&mut bytes[1..]);
        bytes[5..].copy_from_slice(b"Hello");

        let mut results = Vec::new();
        for part in bytes.chunks(3) {
            results.extend(feed(&mut parser, &pool, part));
        }
        assert_eq!(results.len(), 1);
        match results.pop() {
            Some(Ok(Request::SendBlob {
                content_type,
                packet,
            })) => {
                assert_eq!(content_type, ContentType::new(7));
                assert!(packet.content_eq(b"Hello"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(pool.free_blocks(), total);
    }

    #[test]
    fn test_truncated_blob_is_released() {
        let pool = make_pool();
        let total = pool.free_blocks();
        let mut parser = Parser::new(16);
        let mut bytes = [0u8; 1 + BlobEnvelope::LENGTH + 2];
        bytes[0] = Command::SendBlob as u8;
        BlobEnvelope {
            content_type: ContentType::new(1),
            length: 10,
        }
        .encode(&mut bytes[1..]);

        assert!(feed(&mut parser, &pool, &bytes).is_empty());
        assert_eq!(pool.free_blocks(), total - 1);
        assert_eq!(
            parser.transaction_end(),
            Some(CommandError::Truncated(Command::SendBlob))
        );
        assert_eq!(pool.free_blocks(), total);
        assert_eq!(parser.transaction_end(), None);
    }

    #[test]
    fn test_blob_limit() {
        let pool = make_pool();
        let mut parser = Parser::new(16);
        let mut bytes = [0u8; 1 + BlobEnvelope::LENGTH];
        bytes[0] = Command::SendBlob as u8;
        BlobEnvelope {
            content_type: ContentType::new(1),
            length: 17,
        }
        .encode(&mut bytes[1..]);

        let results = feed(&mut parser, &pool, &bytes);
        assert!(matches!(results[..], [Err(CommandError::BlobTooLong)]));
    }
}
