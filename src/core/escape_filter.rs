//! Terminal control sequence stripping for runner output.
//!
//! Model runners decorate their output with spinners, colours and cursor
//! movement meant for an interactive terminal. [`EscapeFilter`] removes those
//! sequences from a byte stream that arrives in arbitrary read-sized pieces,
//! and [`StreamSanitizer`] turns the surviving bytes into text without ever
//! splitting a UTF-8 character.

use memchr::memchr;

/// Escape-introducer byte (ESC).
pub const ESCAPE: u8 = 0x1b;

/// Bytes that end a control sequence once one has been opened.
pub const SEQUENCE_TERMINATORS: &[u8] = b"mhlK";

fn is_kept(byte: u8) -> bool {
    matches!(byte, b'\n' | 0x20..=0x7e) || byte >= 0x80
}

/// Stateful sanitizer that resumes an escape sequence split across chunks.
///
/// The carry buffer holds the unconsumed tail of an open sequence (from the
/// last introducer onward) between calls. Filtering `A` then `B` produces the
/// same bytes as filtering `A ++ B` in one go.
#[derive(Debug, Default, Clone)]
pub struct EscapeFilter {
    carry: Vec<u8>,
}

impl EscapeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter one raw chunk, returning the displayable bytes it contributes.
    pub fn filter(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        filter_chunk(chunk, &mut self.carry, &mut out);
        out
    }

    /// True while an unterminated sequence is waiting for more input.
    pub fn in_sequence(&self) -> bool {
        !self.carry.is_empty()
    }

    /// End of stream: an unterminated sequence is dropped, never emitted.
    pub fn finish(&mut self) {
        self.carry.clear();
    }
}

/// Filter `carry ++ chunk` into `out`, leaving any open sequence in `carry`.
pub fn filter_chunk(chunk: &[u8], carry: &mut Vec<u8>, out: &mut Vec<u8>) {
    let mut in_sequence = false;
    let mut sequence_start = 0;
    let carried = carry.len();

    let mut scan = |bytes: &[u8], offset: usize, out: &mut Vec<u8>| {
        let mut i = 0;
        while i < bytes.len() {
            if !in_sequence {
                // Copy the run up to the next introducer in one pass.
                let run_end = memchr(ESCAPE, &bytes[i..]).map_or(bytes.len(), |pos| i + pos);
                out.extend(bytes[i..run_end].iter().copied().filter(|b| is_kept(*b)));
                if run_end == bytes.len() {
                    break;
                }
                in_sequence = true;
                sequence_start = offset + run_end;
                i = run_end + 1;
                continue;
            }

            let byte = bytes[i];
            if byte == ESCAPE {
                sequence_start = offset + i;
            } else if SEQUENCE_TERMINATORS.contains(&byte) {
                in_sequence = false;
            }
            i += 1;
        }
    };

    let previous = std::mem::take(carry);
    scan(&previous, 0, &mut *out);
    scan(chunk, carried, out);

    if in_sequence {
        if sequence_start < carried {
            carry.extend_from_slice(&previous[sequence_start..]);
            carry.extend_from_slice(chunk);
        } else {
            carry.extend_from_slice(&chunk[sequence_start - carried..]);
        }
    }
}

/// Escape filtering plus incremental UTF-8 decoding for one output stream.
#[derive(Debug, Default)]
pub struct StreamSanitizer {
    filter: EscapeFilter,
    pending: Vec<u8>,
}

impl StreamSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw chunk and get back the text that is complete so far.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let clean = self.filter.filter(chunk);
        self.pending.extend_from_slice(&clean);
        self.drain_text(false)
    }

    /// Flush at end of stream. Open escape sequences are discarded and a
    /// dangling partial character is decoded lossily.
    pub fn finish(&mut self) -> String {
        self.filter.finish();
        self.drain_text(true)
    }

    fn drain_text(&mut self, flush: bool) -> String {
        let mut text = String::new();
        let mut consumed = 0;

        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    consumed += valid_up_to;
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += len;
                        }
                        None if flush => {
                            text.push_str(&String::from_utf8_lossy(&self.pending[consumed..]));
                            consumed = self.pending.len();
                            break;
                        }
                        // Incomplete character at the end; wait for more bytes.
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        text
    }
}

/// Convenience for one-shot filtering of a complete buffer.
pub fn strip_escapes(raw: &[u8]) -> String {
    let mut sanitizer = StreamSanitizer::new();
    let mut text = sanitizer.push(raw);
    text.push_str(&sanitizer.finish());
    text
}
