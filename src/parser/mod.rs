//! The codec contract: an encoder producing wire frames from one packet and
//! a streaming decoder reassembling packets from frames.
//!
//! Binary-carrying packets span several frames (one text header plus one
//! frame per attachment); the decoder keeps the partial packet in a
//! [`ParserState`] and signals [`ParseError::NeedsMoreBinaryData`] until the
//! last attachment arrived.

use std::sync::Mutex;

use bytes::Bytes;

use crate::{engine::Frame, packet::Packet};

mod common;
pub use common::CommonParser;

/// All packet parsers implement this trait.
pub trait Parse: Send + Sync {
    /// Serialize one packet into the frames to write, header first.
    fn encode(&self, packet: Packet) -> Vec<Frame>;

    /// Feed one inbound frame. Returns the packet once fully reassembled;
    /// returns [`ParseError::NeedsMoreBinaryData`] while adjacent binary
    /// payloads are still outstanding.
    fn decode(&self, state: &ParserState, frame: Frame) -> Result<Packet, ParseError>;
}

/// Streaming state of a decoder: the packet waiting for its binary
/// attachments, if any.
#[derive(Debug, Default)]
pub struct ParserState {
    partial: Mutex<Option<PartialPacket>>,
}

#[derive(Debug)]
struct PartialPacket {
    packet: Packet,
    expected: usize,
    bins: Vec<Bytes>,
}

impl ParserState {
    /// Discard any in-flight partial packet.
    pub fn reset(&self) {
        *self.partial.lock().unwrap() = None;
    }

    fn begin(&self, packet: Packet, expected: usize) {
        *self.partial.lock().unwrap() = Some(PartialPacket {
            packet,
            expected,
            bins: Vec::with_capacity(expected),
        });
    }
}

/// Errors when parsing socket.io packets.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// Invalid packet type tag.
    #[error("invalid packet type")]
    InvalidPacketType,

    /// Invalid attachment count on a binary packet.
    #[error("invalid attachments")]
    InvalidAttachments,

    /// The payload is not valid JSON of the expected shape.
    #[error("invalid data: {0}")]
    Data(#[from] serde_json::Error),

    /// A binary frame arrived with no binary packet in flight.
    #[error("received unexpected binary data. Make sure you are using the same parser on both ends.")]
    UnexpectedBinaryPacket,

    /// Not an error: the decoder needs the next adjacent binary frame before
    /// it can emit the packet.
    #[error("needs more binary data before deserialization")]
    NeedsMoreBinaryData,
}
