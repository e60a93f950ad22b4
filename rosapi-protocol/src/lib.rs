//! # rosapi-protocol
//!
//! Wire protocol implementation for the router's remote-administration API.
//!
//! This crate provides:
//! - The variable-length word length prefix (1 to 4 bytes)
//! - Sentence data model (command, attributes, API attributes, queries, tag)
//! - Sentence encoding and incremental stream reassembly

pub mod codec;
pub mod error;
pub mod length;
pub mod sentence;

pub use codec::{Encoder, Reassembler};
pub use error::ProtocolError;
pub use length::{encode_length, encoded_len, ByteReader, LengthDecoder, LengthStatus};
pub use sentence::{Attributes, ResultType, Sentence};

/// Default API port of the router.
pub const DEFAULT_PORT: u16 = 8728;

/// Largest word length the prefix can express (2^28 - 1).
pub const MAX_WORD_LEN: u32 = 0x0FFF_FFFF;
