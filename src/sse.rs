//! Incremental Server-Sent Events decoding.
//!
//! Streaming chat-completion endpoints answer with `text/event-stream` bodies:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"He"}}]}
//!
//! data: {"choices":[{"delta":{"content":"llo"}}]}
//!
//! data: [DONE]
//!
//! ```
//!
//! The network hands us this text as arbitrary byte chunks. A chunk can end in
//! the middle of a multi-byte UTF-8 character, in the middle of the blank-line
//! separator, or contain several complete events at once. [`SseDecoder`] keeps
//! two pieces of state across calls to absorb all of that:
//!
//! 1. **UTF-8 tail**: the trailing bytes of an incomplete character, held back
//!    until the rest of the sequence arrives.
//! 2. **Pending buffer**: decoded text that does not yet end in a blank line.
//!
//! # Event Boundaries
//!
//! An event ends at a blank line, written either `\n\n` or `\r\n\r\n`. The
//! decoder looks for both and cuts at whichever occurs first. After cutting one
//! event it keeps scanning the same buffer, so every event already buffered is
//! yielded before more input is needed.
//!
//! # Fields
//!
//! Only `data:` lines matter here. The prefix and at most one following space
//! are stripped, and multiple `data:` lines in one event are joined with `\n`.
//! `event:`, `id:`, `retry:` and `:` comment lines are ignored; a block with no
//! `data:` line at all (a keep-alive comment, say) produces no event.
//!
//! # Usage
//!
//! ```rust
//! use streamchat::SseDecoder;
//!
//! let mut decoder = SseDecoder::new();
//! let events: Vec<_> = decoder.feed(b"data: {\"a\":1}\n\ndata: [DO").collect();
//! assert_eq!(events.len(), 1);
//!
//! let events: Vec<_> = decoder.feed(b"NE]\n\n").collect();
//! assert!(events[0].is_done());
//! ```

use std::mem;

/// Payload that marks the end of a stream. Never parsed as JSON.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One complete Server-Sent Event, reduced to its `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    data_lines: Vec<String>,
}

impl SseEvent {
    pub fn new(data_lines: Vec<String>) -> Self {
        Self { data_lines }
    }

    /// The `data:` lines of this event, prefix stripped, in order
    pub fn data_lines(&self) -> &[String] {
        &self.data_lines
    }

    /// The event payload: all `data:` lines joined with `\n`
    pub fn data(&self) -> String {
        self.data_lines.join("\n")
    }

    /// True if this event is the `[DONE]` sentinel
    pub fn is_done(&self) -> bool {
        self.data_lines.len() == 1 && self.data_lines[0] == DONE_SENTINEL
    }

    /// Parse one raw event block (separator already removed).
    ///
    /// Returns `None` when the block carries no `data:` line.
    fn from_block(block: &str) -> Option<Self> {
        let data_lines: Vec<String> = block
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value).to_string())
            .collect();

        if data_lines.is_empty() {
            None
        } else {
            Some(Self { data_lines })
        }
    }
}

/// Stateful decoder turning byte chunks into [`SseEvent`]s.
///
/// One decoder serves exactly one response body. Feed chunks in arrival
/// order; call [`SseDecoder::finish`] once the body has ended.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Decoded text not yet terminated by a blank line
    pending: String,

    /// Leading bytes of a UTF-8 sequence split across chunks (at most 3)
    utf8_tail: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate over every event it completes.
    ///
    /// The iterator is lazy and borrows the decoder; events not consumed stay
    /// buffered and are returned by the next `feed` or [`next_event`] call.
    ///
    /// [`next_event`]: SseDecoder::next_event
    pub fn feed(&mut self, bytes: &[u8]) -> Events<'_> {
        self.push(bytes);
        Events { decoder: self }
    }

    /// Append a chunk to the pending buffer without extracting events.
    pub fn push(&mut self, bytes: &[u8]) {
        let joined;
        let mut rest: &[u8] = if self.utf8_tail.is_empty() {
            bytes
        } else {
            let mut buf = mem::take(&mut self.utf8_tail);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.pending.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, remainder) = rest.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.pending.push_str(text);
                    }
                    match err.error_len() {
                        // Invalid sequence in the middle: replace it and go on.
                        Some(len) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            rest = &remainder[len..];
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            self.utf8_tail = remainder.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Cut the next complete event out of the pending buffer.
    ///
    /// Blocks without a `data:` line are consumed and skipped.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some((cut, separator_len)) = find_boundary(&self.pending) {
            let block: String = self.pending.drain(..cut + separator_len).collect();
            if let Some(event) = SseEvent::from_block(&block[..cut]) {
                return Some(event);
            }
        }
        None
    }

    /// Flush the decoder at end of input.
    ///
    /// A held-back partial UTF-8 sequence is decoded lossily. Whatever remains
    /// in the buffer is treated as a final, unterminated event, so a body cut
    /// off mid-event still yields that fragment. For a payload truncated
    /// mid-JSON the session then reports one `FrameParse` error through
    /// `on_error` instead of dropping the tail silently.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.utf8_tail.is_empty() {
            let tail = mem::take(&mut self.utf8_tail);
            self.pending.push_str(&String::from_utf8_lossy(&tail));
        }

        if let Some(event) = self.next_event() {
            return Some(event);
        }

        let rest = mem::take(&mut self.pending);
        SseEvent::from_block(&rest)
    }

    /// Text buffered but not yet part of a complete event
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Lazy iterator over the events currently buffered in a decoder.
#[derive(Debug)]
pub struct Events<'a> {
    decoder: &'a mut SseDecoder,
}

impl Iterator for Events<'_> {
    type Item = SseEvent;

    fn next(&mut self) -> Option<SseEvent> {
        self.decoder.next_event()
    }
}

/// Locate the earliest blank-line separator.
///
/// Returns the index where the separator starts and its length.
fn find_boundary(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n");
    let crlf = buf.find("\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}
