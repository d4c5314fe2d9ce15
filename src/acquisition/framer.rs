//! Line framer for the sensor's text protocol.
//!
//! Serial reads return arbitrary slices of the stream: half a line, several
//! lines, a `\r` in one chunk and its `\n` in the next, or one half of a
//! multi-byte UTF-8 character. The framer keeps the unterminated tail as raw
//! bytes between calls and only decodes complete lines, so a character split
//! across chunks is decoded once both halves are present.

use tracing::warn;

use crate::config::defaults::MAX_LINE_BYTES;

/// Turns a chunked byte stream into trimmed, non-empty text lines.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line_bytes: usize,
    /// Set after an over-long line was dropped; the rest of that line is
    /// skipped up to the next terminator.
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(256),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    /// Feed one chunk and return every line it completed, in arrival order.
    ///
    /// Runs of `\r` and `\n` count as one separator. The trailing fragment
    /// stays buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if !self.pending.is_empty() {
                    if let Some(line) = decode_line(&self.pending) {
                        lines.push(line);
                    }
                }
                self.pending.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.pending.len() >= self.max_line_bytes {
                warn!(
                    max_line_bytes = self.max_line_bytes,
                    "Discarding over-long line without terminator"
                );
                self.pending.clear();
                self.discarding = true;
                continue;
            }

            self.pending.push(byte);
        }

        lines
    }

    /// Bytes buffered for the next line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort decode: invalid sequences become U+FFFD.
fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
