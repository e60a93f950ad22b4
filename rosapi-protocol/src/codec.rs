//! Sentence encoder and stream reassembler.

use crate::error::ProtocolError;
use crate::length::{encode_length, LengthDecoder, LengthStatus};
use crate::sentence::{encode_word, Sentence, TAG_ATTRIBUTE};
use crate::MAX_WORD_LEN;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encodes words and sentences into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Writes one length-prefixed word.
    pub fn encode_word<B: BufMut + ?Sized>(word: &[u8], dst: &mut B) -> Result<(), ProtocolError> {
        encode_length(word.len(), dst)?;
        dst.put_slice(word);
        Ok(())
    }

    /// Encodes a whole sentence, including the empty terminator word.
    ///
    /// When `tag` is given a `.tag=<tag>` word is emitted after the queries.
    /// Nothing is returned unless every word fits, so a failed sentence never
    /// reaches the wire half-written.
    pub fn encode_sentence(
        sentence: &Sentence,
        tag: Option<&str>,
    ) -> Result<BytesMut, ProtocolError> {
        Self::encode_sentence_limited(sentence, tag, MAX_WORD_LEN)
    }

    /// Like [`Encoder::encode_sentence`], refusing words longer than
    /// `max_word_len` bytes.
    pub fn encode_sentence_limited(
        sentence: &Sentence,
        tag: Option<&str>,
        max_word_len: u32,
    ) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for word in sentence.words() {
            Self::encode_limited(&encode_word(&word), max_word_len, &mut buf)?;
        }
        if let Some(tag) = tag {
            let word = format!(".{}={}", TAG_ATTRIBUTE, tag);
            Self::encode_limited(&encode_word(&word), max_word_len, &mut buf)?;
        }
        buf.put_u8(0);
        Ok(buf)
    }

    fn encode_limited(
        word: &[u8],
        max_word_len: u32,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        if word.len() > max_word_len as usize {
            return Err(match u32::try_from(word.len()) {
                Ok(size) if size <= MAX_WORD_LEN => ProtocolError::WordTooLarge {
                    size,
                    max: max_word_len,
                },
                _ => ProtocolError::EncodeLengthTooLarge(word.len()),
            });
        }
        Self::encode_word(word, dst)
    }

    /// Encodes raw words followed by the terminator, preserving their order.
    pub fn encode_words<I, W>(words: I) -> Result<BytesMut, ProtocolError>
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        let mut buf = BytesMut::new();
        for word in words {
            Self::encode_word(word.as_ref(), &mut buf)?;
        }
        buf.put_u8(0);
        Ok(buf)
    }
}

/// Stateful decoder turning a byte stream into sentences.
///
/// Holds the partially decoded length prefix, the partially received word
/// and the words of the sentence being assembled, so input may be sliced
/// at any byte boundary.
#[derive(Debug)]
pub struct Reassembler {
    length: LengthDecoder,
    /// Body bytes still missing from `word`. `None` while reading a prefix.
    remaining: Option<usize>,
    word: BytesMut,
    words: Vec<Bytes>,
    max_word_len: u32,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_max_word_len(MAX_WORD_LEN)
    }

    /// Creates a reassembler rejecting words longer than `max_word_len`.
    pub fn with_max_word_len(max_word_len: u32) -> Self {
        Self {
            length: LengthDecoder::new(),
            remaining: None,
            word: BytesMut::new(),
            words: Vec::new(),
            max_word_len: max_word_len.min(MAX_WORD_LEN),
        }
    }

    /// Consumes every available byte of `src` and returns the sentences
    /// completed by them, in stream order.
    pub fn pump<B: Buf + ?Sized>(&mut self, src: &mut B) -> Result<Vec<Sentence>, ProtocolError> {
        let mut sentences = Vec::new();
        while let Some(sentence) = self.next_sentence(src)? {
            sentences.push(sentence);
        }
        Ok(sentences)
    }

    /// Consumes bytes of `src` up to the end of the next sentence.
    ///
    /// Returns `Ok(None)` once `src` is exhausted mid-sentence.
    pub fn next_sentence<B: Buf + ?Sized>(
        &mut self,
        src: &mut B,
    ) -> Result<Option<Sentence>, ProtocolError> {
        loop {
            let remaining = match self.remaining {
                Some(remaining) => remaining,
                None => match self.length.decode(src)? {
                    LengthStatus::NeedMore(_) => return Ok(None),
                    LengthStatus::Complete(0) => {
                        let words = std::mem::take(&mut self.words);
                        tracing::trace!("sentence complete ({} words)", words.len());
                        return Ok(Some(Sentence::from_words(words)));
                    }
                    LengthStatus::Complete(len) => {
                        if len > self.max_word_len {
                            return Err(ProtocolError::WordTooLarge {
                                size: len,
                                max: self.max_word_len,
                            });
                        }
                        len as usize
                    }
                },
            };

            let n = remaining.min(src.remaining());
            self.word.put(Buf::take(&mut *src, n));

            if n < remaining {
                self.remaining = Some(remaining - n);
                return Ok(None);
            }

            self.words.push(self.word.split().freeze());
            self.remaining = None;
        }
    }

    /// Returns whether bytes of an unfinished sentence are held.
    pub fn has_partial(&self) -> bool {
        self.length.is_pending() || self.remaining.is_some() || !self.words.is_empty()
    }

    /// Discards any partial prefix, word or sentence.
    pub fn reset(&mut self) {
        self.length.reset();
        self.remaining = None;
        self.word.clear();
        self.words.clear();
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
