//! Incremental parser for newline-delimited `data:` event streams
//!
//! Bytes are buffered until a `\n` arrives, so a frame split across network
//! chunks (including a multi-byte UTF-8 sequence split in the middle) parses
//! exactly as if it had arrived in one piece. Each complete line is either the
//! `[DONE]` terminal marker or a JSON delta object in the OpenAI-compatible
//! chat completion chunk format.
//! Bytes that are not valid UTF-8 decode to U+FFFD instead of failing the line.

use crate::error::{ChatError, FrameError};
use crate::streaming::ChunkStream;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Payload that marks normal end of stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the provider's event stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Delta(Delta),
    Done,
}

/// Increments carried by one frame, read from `choices[0].delta`.
///
/// Empty strings are normalized to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub reasoning: Option<String>,
    pub content: Option<String>,
}

impl Delta {
    /// Extracts the increments from a parsed frame. Objects that do not follow
    /// the chunk schema yield an empty delta rather than an error.
    pub fn from_json(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .pointer(&format!("/choices/0/delta/{name}"))
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
        };

        Self {
            reasoning: field("reasoning_content"),
            content: field("content"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reasoning.is_none() && self.content.is_none()
    }
}

/// Splits raw bytes into frames
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame completed by it, in order.
    /// A trailing partial line stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            if let Some(frame) = parse_line(&self.buffer[consumed..end])? {
                frames.push(frame);
            }
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);

        Ok(frames)
    }

    /// Parses whatever is left in the buffer as a final line
    pub fn finish(&mut self) -> Result<Option<Frame>, FrameError> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Drops the buffered partial line, returning how many bytes were lost
    pub fn discard(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        len
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Result<Option<Frame>, FrameError> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    // SSE comments such as ": keep-alive"
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = line.strip_prefix("data:").unwrap_or(line).trim();
    if payload.is_empty() {
        return Ok(None);
    }
    if payload == DONE_SENTINEL {
        return Ok(Some(Frame::Done));
    }

    let value: Value = serde_json::from_str(payload).map_err(|source| FrameError::Json {
        payload: payload.to_string(),
        source,
    })?;
    trace!("Received stream event: '{}'", payload);
    Ok(Some(Frame::Delta(Delta::from_json(&value))))
}

/// Pulls frames lazily out of a [`ChunkStream`].
///
/// The sequence is finite and cannot be restarted: after the source ends or
/// an error is returned, every further call yields `Ok(None)`.
pub struct FrameReader<S> {
    source: S,
    parser: FrameParser,
    pending: VecDeque<Frame>,
    flush_trailing_line: bool,
    finished: bool,
}

impl<S: ChunkStream> FrameReader<S> {
    /// With `flush_trailing_line` unset, a final line that never received its
    /// `\n` is dropped when the source ends.
    pub fn new(source: S, flush_trailing_line: bool) -> Self {
        Self {
            source,
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            flush_trailing_line,
            finished: false,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ChatError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }

            let chunk = match self.source.next_chunk().await {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Err(ChatError::Stream(e.to_string()));
                }
            };

            match chunk {
                Some(bytes) => match self.parser.push(&bytes) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(e) => {
                        self.finished = true;
                        return Err(e.into());
                    }
                },
                None => {
                    self.finished = true;
                    if self.flush_trailing_line {
                        if let Some(frame) = self.parser.finish()? {
                            self.pending.push_back(frame);
                        }
                    } else {
                        let dropped = self.parser.discard();
                        if dropped > 0 {
                            debug!("Stream ended mid-line, dropping {} buffered bytes", dropped);
                        }
                    }
                }
            }
        }
    }
}
