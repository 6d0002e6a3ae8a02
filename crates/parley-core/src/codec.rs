//! Newline-delimited JSON framing for the parley stream.
//!
//! Wire format: `<JSON object>\n`, in both directions. Blank lines are
//! skipped; a trailing `\r` is tolerated.

use crate::error::{RelayError, RelayResult};

/// Longest line the decoder accepts by default (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Encode a serializable value into a newline-terminated JSON frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> RelayResult<Vec<u8>> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode a single JSON payload (without the terminator) into a typed value.
pub fn json_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> RelayResult<T> {
    let value: T = serde_json::from_slice(data)?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Feed bytes into the decoder and return all complete decoded messages.
    ///
    /// Fails if a complete line is not valid JSON for `T`, or if a line grows
    /// past the frame limit before its terminator arrives.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> RelayResult<Vec<T>> {
        let mut messages = Vec::new();
        for line in self.feed_raw(data)? {
            messages.push(json_decode(&line)?);
        }
        Ok(messages)
    }

    /// Feed raw bytes and return complete lines without their terminators.
    pub fn feed_raw(&mut self, data: &[u8]) -> RelayResult<Vec<Vec<u8>>> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(line) = self.next_frame()? {
            frames.push(line);
        }
        Ok(frames)
    }

    /// Append bytes without extracting anything.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete, non-blank line out of the buffer.
    ///
    /// Lines before a bad one are handed out first; the error surfaces only
    /// when the bad line itself is reached.
    pub fn next_frame(&mut self) -> RelayResult<Option<Vec<u8>>> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_frame_len {
                return Err(RelayError::Codec(format!(
                    "frame too large: {} bytes (max {})",
                    line.len(),
                    self.max_frame_len
                )));
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some(line));
        }

        if self.buffer.len() > self.max_frame_len {
            return Err(RelayError::Codec(format!(
                "frame too large: {} bytes buffered without terminator (max {})",
                self.buffer.len(),
                self.max_frame_len
            )));
        }
        Ok(None)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
