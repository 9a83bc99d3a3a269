//! Line framing for the upstream byte stream.
//!
//! Chunks arrive with no alignment to protocol lines, so [`LineBuffer`] keeps the unterminated
//! tail between arrivals and hands out complete lines one at a time. Nothing in here looks at
//! what a line means.

use bytes::{Buf, Bytes, BytesMut};
use bytes_utils::Str;

use crate::constants::{CR, EMPTY_STR, LF};

/// Accumulates upstream bytes and splits them into logical lines on `\n` or `\r\n`.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    buffer: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Resume from an existing unterminated tail
    pub fn from_tail(buffer: BytesMut) -> Self {
        Self { buffer }
    }

    /// Append a newly arrived chunk. No lines are extracted until asked for.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Removes the next complete line from the buffer, without its line ending.
    /// Returns [None] if the buffer holds no `\n` yet.
    pub fn next_line(&mut self) -> Option<Str> {
        let line_end = memchr::memchr(LF, &self.buffer)?;

        let mut line = self.buffer.split_to(line_end).freeze();
        self.buffer.advance(1);

        if line.last() == Some(&CR) {
            line.truncate(line.len() - 1);
        }

        Some(into_str(line))
    }

    /// Draining iterator over every complete line currently buffered
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { buffer: self }
    }

    /// Flush the leftover tail as one final line at the end of the upstream stream.
    /// Returns [None] when nothing but whitespace is left.
    pub fn finish(&mut self) -> Option<Str> {
        let tail = into_str(self.buffer.split().freeze());
        let text: &str = &tail;
        let end = text.trim_end().len();
        let start = end - text[..end].trim_start().len();
        if start == end {
            return None;
        }
        // Safety: both ends sit on char boundaries found by trim
        Some(unsafe { Str::from_inner_unchecked(tail.into_inner().slice(start..end)) })
    }

    /// Throw away whatever is buffered, used once the stream is finished early
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The unterminated tail, i.e. bytes received after the last line break
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the current buffer, useful if you want to check for leftovers
    pub fn into_inner(self) -> BytesMut {
        self.buffer
    }
}

/// Iterator returned by [`LineBuffer::lines`]
#[derive(Debug)]
pub struct Lines<'a> {
    buffer: &'a mut LineBuffer,
}

impl Iterator for Lines<'_> {
    type Item = Str;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.next_line()
    }
}

/// Pure form of the reassembler: appends `chunk` to `buffer` and returns every complete line in
/// order together with the new buffer, which holds the trailing partial line (possibly empty).
pub fn reassemble(buffer: BytesMut, chunk: &[u8]) -> (Vec<Str>, BytesMut) {
    let mut lines = LineBuffer::from_tail(buffer);
    lines.push(chunk);
    let complete = lines.lines().collect();
    (complete, lines.into_inner())
}

// Upstream text is decoded one whole line at a time. LF never shows up inside a multi-byte
// sequence, so a character can't be split across two lines and this is the same no matter how
// the chunks were cut.
fn into_str(line: Bytes) -> Str {
    if line.is_empty() {
        return EMPTY_STR;
    }
    match core::str::from_utf8(&line) {
        // Safety: we just checked the bytes are valid utf8
        Ok(_) => unsafe { Str::from_inner_unchecked(line) },
        Err(_) => {
            let lossy = String::from_utf8_lossy(&line).into_owned();
            // Safety: a String is always valid utf8
            unsafe { Str::from_inner_unchecked(Bytes::from(lossy)) }
        }
    }
}
