//! Line Frame Decoder
//!
//! Turns raw network chunks into complete event lines. Chunk boundaries are
//! arbitrary: a chunk may end in the middle of a multi-byte character, in the
//! middle of a JSON payload, or between a `\r` and its `\n`. All carry-over
//! state lives in an explicit [`FrameBuffer`] value that is threaded from one
//! call to the next, so the decoder itself holds no hidden state.
//!
//! # Invariants
//!
//! - Concatenating every emitted line (plus its terminator) reproduces the
//!   decoded input exactly, however the input was split.
//! - No partial line is emitted before the stream ends.
//! - Invalid UTF-8 becomes U+FFFD; valid characters around it are kept.

/// Carry-over state between two chunk reads
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Bytes of a multi-byte character whose remainder has not arrived yet
    pending_bytes: Vec<u8>,
    /// Text after the last line terminator
    partial_line: String,
}

impl FrameBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is carried over
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_bytes.is_empty() && self.partial_line.is_empty()
    }

    /// Bytes currently held (undecoded tail plus partial line)
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending_bytes.len() + self.partial_line.len()
    }

    /// The incomplete trailing line
    #[must_use]
    pub fn partial_line(&self) -> &str {
        &self.partial_line
    }
}

/// Decode one chunk against the carried-over state
///
/// Returns the new carry-over state and every line completed by this chunk,
/// without terminators (a trailing `\r` is stripped too).
#[must_use]
pub fn decode_chunk(buffer: FrameBuffer, chunk: &[u8]) -> (FrameBuffer, Vec<String>) {
    let FrameBuffer {
        mut pending_bytes,
        mut partial_line,
    } = buffer;

    let decoded = if pending_bytes.is_empty() {
        decode_utf8(chunk, &mut pending_bytes)
    } else {
        let mut joined = std::mem::take(&mut pending_bytes);
        joined.extend_from_slice(chunk);
        decode_utf8(&joined, &mut pending_bytes)
    };

    let mut lines = Vec::new();
    let mut rest = decoded.as_str();
    while let Some(pos) = rest.find('\n') {
        let mut line = std::mem::take(&mut partial_line);
        line.push_str(&rest[..pos]);
        if line.ends_with('\r') {
            line.pop();
        }
        lines.push(line);
        rest = &rest[pos + 1..];
    }
    partial_line.push_str(rest);

    (
        FrameBuffer {
            pending_bytes,
            partial_line,
        },
        lines,
    )
}

/// Flush the carried-over state at end of stream
///
/// The trailing fragment is returned as a final line even without a
/// terminator. An incomplete character at the very end decodes to U+FFFD.
#[must_use]
pub fn finish(buffer: FrameBuffer) -> Option<String> {
    let FrameBuffer {
        pending_bytes,
        mut partial_line,
    } = buffer;

    if !pending_bytes.is_empty() {
        partial_line.push_str(&String::from_utf8_lossy(&pending_bytes));
    }
    if partial_line.ends_with('\r') {
        partial_line.pop();
    }

    (!partial_line.is_empty()).then_some(partial_line)
}

/// Decode as much of `bytes` as possible
///
/// An incomplete sequence at the end is moved into `tail`; invalid sequences
/// anywhere else are replaced with U+FFFD.
fn decode_utf8(bytes: &[u8], tail: &mut Vec<u8>) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut pos = 0;

    while pos < bytes.len() {
        match std::str::from_utf8(&bytes[pos..]) {
            Ok(valid) => {
                out.push_str(valid);
                pos = bytes.len();
            }
            Err(e) => {
                let valid_end = pos + e.valid_up_to();
                // `valid_up_to` marks a verified UTF-8 prefix.
                out.push_str(std::str::from_utf8(&bytes[pos..valid_end]).unwrap_or_default());
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pos = valid_end + bad;
                    }
                    None => {
                        tail.extend_from_slice(&bytes[valid_end..]);
                        pos = bytes.len();
                    }
                }
            }
        }
    }

    out
}

/// Owning decoder used by the session controller
///
/// A thin wrapper that threads a [`FrameBuffer`] through [`decode_chunk`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: FrameBuffer,
    lines_emitted: u64,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the lines it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let (buffer, lines) = decode_chunk(std::mem::take(&mut self.buffer), chunk);
        self.buffer = buffer;
        self.lines_emitted += lines.len() as u64;
        lines
    }

    /// Flush the trailing fragment at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let line = finish(std::mem::take(&mut self.buffer));
        if line.is_some() {
            self.lines_emitted += 1;
        }
        line
    }

    /// Bytes held between reads
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total lines produced so far
    #[must_use]
    pub fn lines_emitted(&self) -> u64 {
        self.lines_emitted
    }

    /// Drop any carried-over state
    pub fn clear(&mut self) {
        self.buffer = FrameBuffer::default();
    }
}
