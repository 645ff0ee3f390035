//! Provides [`MessageFramer`], which cuts the transport's byte stream into complete JSON objects.
//!
//! The stream has no length prefix or delimiter; a message ends when its outermost brace closes. Braces inside string
//! literals (including escaped quotes) are not counted. Bytes outside any object, such as newlines between messages,
//! are dropped.

use alloc::vec::Vec;
use core::mem;

/// Outcome of feeding one byte to a [`MessageFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// More bytes are needed.
    Incomplete,
    /// A complete message.
    Message(Vec<u8>),
    /// The current message outgrew the limit. The rest of it will be consumed and dropped.
    Oversize,
}

/// Incremental splitter for a stream of JSON objects.
#[derive(Debug)]
pub struct MessageFramer {
    buffer: Vec<u8>,
    max_len: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarding: bool,
}

impl MessageFramer {
    /// Constructs a framer that accepts messages of up to `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_len,
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
        }
    }

    /// Changes the size limit. A message already under way is held to the new limit for its remaining bytes.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }

    /// Size limit currently in force.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns `true` between messages.
    pub fn is_idle(&self) -> bool {
        self.depth == 0
    }

    /// Returns `true` once the opening brace of a message within the size limit has been consumed.
    pub fn in_message(&self) -> bool {
        self.depth > 0 && !self.discarding
    }

    /// Feeds bytes that are already waiting, as returned by `next`, until a message has started or `next` runs dry.
    ///
    /// Noise between messages and the remains of an oversize message are consumed along the way, so a `false`
    /// return means there is nothing worth waiting for. Never consumes past the opening brace.
    pub fn poll_start(&mut self, mut next: impl FnMut() -> Option<u8>) -> bool {
        while !self.in_message() {
            match next() {
                Some(byte) => {
                    self.push(byte);
                }
                None => return false,
            }
        }
        true
    }

    /// Forgets any partial message, e.g. after a read timed out.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.discarding = false;
    }

    /// Feeds one byte from the stream.
    pub fn push(&mut self, byte: u8) -> Frame {
        if self.depth == 0 && byte != b'{' {
            return Frame::Incomplete;
        }

        let closed = self.track(byte);

        if self.discarding {
            if closed {
                self.discarding = false;
            }
            return Frame::Incomplete;
        }

        if self.buffer.len() == self.max_len {
            self.buffer.clear();
            if closed {
                self.reset();
            } else {
                self.discarding = true;
            }
            return Frame::Oversize;
        }

        self.buffer.push(byte);
        if closed {
            Frame::Message(mem::take(&mut self.buffer))
        } else {
            Frame::Incomplete
        }
    }

    /// Updates nesting state; returns `true` when `byte` closes the outermost object.
    fn track(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return false;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth = self.depth.saturating_sub(1);
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}
