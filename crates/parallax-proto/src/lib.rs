// SPDX-License-Identifier: Apache-2.0
//! Wire schema for the Parallax cluster sync protocol.
//!
//! Every message on a cluster connection is framed as
//!
//! ``TOKEN(1) || LENGTH(4, u32 LE) || PAYLOAD``
//!
//! * `Sync` payloads start with an 8-byte little-endian frame number followed
//!   by the shared-data blob (opaque to this layer).
//! * `Size` payloads carry the 4-byte buffer size a peer must be prepared to
//!   receive before the next oversized `Sync` payload arrives.
//! * Data-transfer packages ride in `Fill` payloads prefixed with a 4-byte
//!   package id and are answered with `Ack`.
//!
//! Token values sit in the ASCII device-control range so that a naive text
//! parser reading the stream can never mistake a header byte for payload
//! content.

use thiserror::Error;

pub mod wire;

pub use wire::{read_message, write_message};

/// Size in bytes of the fixed message header (token + payload length).
pub const HEADER_SIZE: usize = 5;

/// Size in bytes of the frame-number prefix inside a `Sync` payload.
pub const FRAME_NUMBER_SIZE: usize = 8;

/// Frame numbers wrap modulo this value to bound integer growth; treat frame
/// arithmetic as modular, never as an error.
pub const FRAME_NUMBER_WRAP: u64 = 1 << 32;

/// Hard ceiling for any payload length. A `LENGTH` or `Size` request above
/// this bound is a protocol violation that terminates the connection.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

/// Initial receive-buffer size each peer declares before any renegotiation.
pub const DEFAULT_BUFFER_SIZE: u32 = 1024;

/// Advance a frame counter by one, wrapping at [`FRAME_NUMBER_WRAP`].
#[inline]
#[must_use]
pub fn next_frame(frame: u64) -> u64 {
    (frame + 1) % FRAME_NUMBER_WRAP
}

/// Message tokens in the protocol.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Data-transfer package acknowledgement.
    Ack = 6,
    /// Frame-numbered shared-state payload (or an empty-payload frame ack).
    Sync = 17,
    /// Whole-cluster-connected notification from the server.
    Connected = 18,
    /// Orderly connection teardown.
    Disconnect = 19,
    /// Out-of-band payload: data-transfer packages and external commands.
    Fill = 20,
    /// Receive-buffer renegotiation preceding an oversized payload.
    Size = 21,
}

impl Token {
    /// Parse a raw header byte into a token, `None` for unknown values.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            6 => Some(Token::Ack),
            17 => Some(Token::Sync),
            18 => Some(Token::Connected),
            19 => Some(Token::Disconnect),
            20 => Some(Token::Fill),
            21 => Some(Token::Size),
            _ => None,
        }
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Shared-state broadcast (server → client) or frame ack when the blob is
    /// empty (client → server).
    Sync {
        /// Logical frame number, modulo [`FRAME_NUMBER_WRAP`].
        frame: u64,
        /// Opaque shared-data blob produced by the application encode callback.
        payload: Vec<u8>,
    },
    /// All expected cluster connections are up; clients may leave their
    /// start-up gate.
    Connected,
    /// Peer is closing the connection deliberately.
    Disconnect,
    /// Out-of-band bytes: a data-transfer package (`package_id || data`) or an
    /// external-control command, depending on the connection type.
    Fill {
        /// Raw out-of-band payload.
        payload: Vec<u8>,
    },
    /// The sender is about to transmit a payload of `required` bytes; the
    /// receiver must grow its declared buffer first.
    Size {
        /// Required receive-buffer size in bytes.
        required: u32,
    },
    /// Acknowledgement for the data-transfer package with this id.
    Ack {
        /// Package id being acknowledged.
        package: i32,
    },
}

impl Message {
    /// The header token this message is framed with.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            Message::Sync { .. } => Token::Sync,
            Message::Connected => Token::Connected,
            Message::Disconnect => Token::Disconnect,
            Message::Fill { .. } => Token::Fill,
            Message::Size { .. } => Token::Size,
            Message::Ack { .. } => Token::Ack,
        }
    }

    /// Payload length on the wire, excluding the header.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        match self {
            Message::Sync { payload, .. } => (FRAME_NUMBER_SIZE + payload.len()) as u32,
            Message::Connected | Message::Disconnect => 0,
            Message::Fill { payload } => payload.len() as u32,
            Message::Size { .. } => 4,
            Message::Ack { .. } => 4,
        }
    }
}

/// Errors produced while encoding or decoding protocol messages.
///
/// Transient errors leave the byte stream aligned on the next header; the
/// caller may log and keep reading. Everything else is connection-fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying socket/stream failure (including short reads mid-frame).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Header byte is not a known token; its payload was skipped.
    #[error("unknown message token {token} ({skipped} payload bytes skipped)")]
    UnknownToken {
        /// The raw header byte.
        token: u8,
        /// Number of payload bytes consumed to keep the stream aligned.
        skipped: u32,
    },
    /// A known token with an invalid payload (e.g. `Sync` shorter than its
    /// frame-number prefix); the payload was consumed.
    #[error("malformed {token:?} message: {reason}")]
    Malformed {
        /// Token of the offending message.
        token: Token,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// Declared payload length exceeds the negotiated or absolute maximum.
    #[error("payload length {length} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Length field from the header.
        length: u32,
        /// The bound that was violated.
        max: u32,
    },
}

impl ProtocolError {
    /// Whether the connection can keep reading after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownToken { .. } | ProtocolError::Malformed { .. }
        )
    }
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
