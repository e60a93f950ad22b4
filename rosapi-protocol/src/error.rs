//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or reassembling words.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid word length prefix: {0:#04x}")]
    InvalidLengthPrefix(u8),

    #[error("word too long to encode: {0} bytes (max {max})", max = crate::MAX_WORD_LEN)]
    EncodeLengthTooLarge(usize),

    #[error("word too large: {size} bytes (max {max})")]
    WordTooLarge { size: u32, max: u32 },
}
