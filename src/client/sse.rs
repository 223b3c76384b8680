//! Incremental Server-Sent Events decoder.

use crate::error::{Result, SystemError};

/// Longest line accepted before the stream is considered broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded unit of an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete event's `data` payload
    Event(String),
    /// A comment line, sent by servers as a keep-alive
    KeepAlive,
}

/// Splits a byte stream into SSE frames.
///
/// Chunks may end anywhere, including inside a line or a UTF-8 sequence.
/// Fields other than `data` are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completed.
    ///
    /// Fails once a single line grows past [`MAX_LINE_BYTES`]; the decoder is
    /// reset and the connection should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut line_start = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line_end = self.scanned + offset;
            let mut line = &self.buffer[line_start..line_end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if let Some(frame) = decode_line(&mut self.data, line) {
                frames.push(frame);
            }
            line_start = line_end + 1;
            self.scanned = line_start;
        }

        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            self.data.clear();
            return Err(SystemError::parse_error(format!(
                "SSE line exceeds {} bytes ({} buffered)",
                MAX_LINE_BYTES, len
            )));
        }

        Ok(frames)
    }
}

fn decode_line(data: &mut Vec<String>, line: &[u8]) -> Option<Frame> {
    if line.is_empty() {
        if data.is_empty() {
            return None;
        }
        let payload = data.join("\n");
        data.clear();
        return Some(Frame::Event(payload));
    }
    if line.starts_with(b":") {
        return Some(Frame::KeepAlive);
    }

    let line = String::from_utf8_lossy(line);
    let (field, value) = match line.split_once(':') {
        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
        None => (line.as_ref(), ""),
    };
    if field == "data" {
        data.push(value.to_string());
    }
    None
}
