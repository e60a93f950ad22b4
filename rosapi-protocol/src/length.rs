//! Variable-length word length prefix.
//!
//! Every word on the wire is preceded by its byte length, encoded in 1 to 4
//! bytes. The high bits of the first byte select the form:
//!
//! ```text
//! 0xxxxxxx                              len <  0x80
//! 10xxxxxx xxxxxxxx                     len <  0x4000
//! 110xxxxx xxxxxxxx xxxxxxxx            len <  0x20_0000
//! 1110xxxx xxxxxxxx xxxxxxxx xxxxxxxx   len <  0x1000_0000
//! 1111xxxx                              reserved
//! ```
//!
//! Bytes after the first are the remaining length bits, most significant
//! first. The encoder always emits the shortest form.

use crate::error::ProtocolError;
use crate::MAX_WORD_LEN;
use bytes::{Buf, BufMut};

/// Source of single bytes for the incremental decoder.
///
/// Yields the next byte if one is available right now and `None` otherwise;
/// it never blocks.
pub trait ByteReader {
    fn next_byte(&mut self) -> Option<u8>;
}

impl<B: Buf + ?Sized> ByteReader for B {
    fn next_byte(&mut self) -> Option<u8> {
        if self.has_remaining() {
            Some(self.get_u8())
        } else {
            None
        }
    }
}

/// Returns the number of prefix bytes needed to encode `len`.
pub fn encoded_len(len: usize) -> Result<usize, ProtocolError> {
    match len {
        0..=0x7F => Ok(1),
        0x80..=0x3FFF => Ok(2),
        0x4000..=0x1F_FFFF => Ok(3),
        0x20_0000..=0x0FFF_FFFF => Ok(4),
        _ => Err(ProtocolError::EncodeLengthTooLarge(len)),
    }
}

/// Writes the length prefix for a word of `len` bytes.
///
/// Returns the number of bytes written.
pub fn encode_length<B: BufMut + ?Sized>(len: usize, dst: &mut B) -> Result<usize, ProtocolError> {
    let n = encoded_len(len)?;
    let len = len as u32;
    debug_assert!(len <= MAX_WORD_LEN);

    match n {
        1 => dst.put_u8(len as u8),
        2 => dst.put_u16(len as u16 | 0x8000),
        3 => {
            dst.put_u8((len >> 16) as u8 | 0xC0);
            dst.put_u16(len as u16);
        }
        _ => dst.put_u32(len | 0xE000_0000),
    }

    Ok(n)
}

/// Result of feeding bytes to a [`LengthDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthStatus {
    /// All prefix bytes were consumed.
    Complete(u32),
    /// The prefix is incomplete; this many more bytes are required.
    NeedMore(usize),
}

/// Incremental decoder for a single length prefix.
///
/// Partial prefixes are kept across calls, so a prefix split over several
/// socket reads decodes the same as one received whole.
#[derive(Debug, Clone, Default)]
pub struct LengthDecoder {
    buf: [u8; 4],
    have: usize,
    need: usize,
}

impl LengthDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether some, but not all, prefix bytes have been consumed.
    pub fn is_pending(&self) -> bool {
        self.have > 0
    }

    /// Discards any partially decoded prefix.
    pub fn reset(&mut self) {
        self.have = 0;
        self.need = 0;
    }

    /// Pulls bytes from `src` until the prefix is complete or `src` runs dry.
    pub fn decode<R: ByteReader + ?Sized>(
        &mut self,
        src: &mut R,
    ) -> Result<LengthStatus, ProtocolError> {
        if self.have == 0 {
            let Some(first) = src.next_byte() else {
                return Ok(LengthStatus::NeedMore(1));
            };
            self.need = prefix_len(first)?;
            self.buf[0] = first;
            self.have = 1;
        }

        while self.have < self.need {
            match src.next_byte() {
                Some(b) => {
                    self.buf[self.have] = b;
                    self.have += 1;
                }
                None => return Ok(LengthStatus::NeedMore(self.need - self.have)),
            }
        }

        let len = compose(&self.buf, self.need);
        self.reset();
        Ok(LengthStatus::Complete(len))
    }
}

/// Number of prefix bytes announced by the first byte.
fn prefix_len(first: u8) -> Result<usize, ProtocolError> {
    match first {
        0x00..=0x7F => Ok(1),
        0x80..=0xBF => Ok(2),
        0xC0..=0xDF => Ok(3),
        0xE0..=0xEF => Ok(4),
        _ => Err(ProtocolError::InvalidLengthPrefix(first)),
    }
}

fn compose(b: &[u8; 4], n: usize) -> u32 {
    let [b0, b1, b2, b3] = b.map(u32::from);
    match n {
        1 => b0,
        2 => (b0 & 0x7F) << 8 | b1,
        3 => (b0 & 0x3F) << 16 | b1 << 8 | b2,
        _ => (b0 & 0x1F) << 24 | b1 << 16 | b2 << 8 | b3,
    }
}
