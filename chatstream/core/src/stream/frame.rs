//! Frame Reader
//!
//! Turns the raw byte fragments of a completion response into complete frame
//! payloads.
//!
//! # Frame Format
//!
//! ```text
//! : keep-alive comment            <- ignored
//! data: {"type":"chunk",...}      <- tagged line, payload after the tag
//!                                 <- blank line terminates the frame
//! ```
//!
//! Lines end in `\n` or `\r\n`. Several tagged lines in one frame are joined
//! with `\n`. Untagged lines (comments, `event:`, `id:`) never produce errors.
//! The tag and the terminator line come from [`FrameConfig`]; the defaults are
//! `data:` and an empty line.
//! A frame still unterminated when the source ends is discarded.
//!
//! # Security
//!
//! - Payloads larger than `FrameConfig::max_frame_bytes` are dropped
//! - A line that never terminates cannot grow the buffer past that limit

use futures::{Stream, StreamExt};

use crate::config::FrameConfig;

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frame payloads. Buffering is
/// byte-level and text is decoded per complete line, so a multi-byte UTF-8
/// character split across fragments is reassembled intact.
#[derive(Debug)]
pub struct FrameReader {
    config: FrameConfig,
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Payload of the frame being assembled, once a tagged line was seen
    payload: Option<String>,
    /// Current frame exceeded the size limit and will be dropped
    oversized: bool,
    /// Discarding the rest of an overlong line
    skipping_line: bool,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

impl FrameReader {
    /// Create a reader for one connection
    #[must_use]
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(4096),
            read_pos: 0,
            payload: None,
            oversized: false,
            skipping_line: false,
        }
    }

    /// Append a fragment to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > 0 && self.read_pos * 2 >= self.buffer.len() {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed as complete lines
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Whether an unterminated frame or line is pending
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.payload.is_some() || self.available() > 0 || self.skipping_line
    }

    /// Try to complete the next frame
    ///
    /// Returns `None` when more data is needed.
    pub fn next_frame(&mut self) -> Option<String> {
        while let Some(line) = self.next_line() {
            if line == self.config.terminator {
                let oversized = std::mem::take(&mut self.oversized);
                match self.payload.take() {
                    Some(_) if oversized => {
                        tracing::warn!(
                            limit = self.config.max_frame_bytes,
                            "Dropping frame larger than the size limit"
                        );
                    }
                    Some(payload) => return Some(payload),
                    None => {}
                }
                continue;
            }

            if self.oversized {
                continue;
            }

            let Some(data) = self.strip_tag(&line) else {
                tracing::trace!(line = %line, "Ignoring untagged line");
                continue;
            };

            let payload = match self.payload.take() {
                Some(mut payload) => {
                    payload.push('\n');
                    payload.push_str(data);
                    payload
                }
                None => data.to_string(),
            };

            if payload.len() > self.config.max_frame_bytes {
                self.oversized = true;
                self.payload = Some(String::new());
            } else {
                self.payload = Some(payload);
            }
        }
        None
    }

    /// Clear all buffered state
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.payload = None;
        self.oversized = false;
        self.skipping_line = false;
    }

    fn strip_tag<'a>(&self, line: &'a str) -> Option<&'a str> {
        let data = line.strip_prefix(self.config.tag.as_str())?;
        Some(data.strip_prefix(' ').unwrap_or(data))
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let available = &self.buffer[self.read_pos..];
            let Some(pos) = available.iter().position(|&b| b == b'\n') else {
                if available.len() > self.config.max_frame_bytes {
                    self.skipping_line = true;
                    self.buffer.clear();
                    self.read_pos = 0;
                }
                return None;
            };

            let mut line = &available[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let text = String::from_utf8_lossy(line).into_owned();
            self.read_pos += pos + 1;

            if std::mem::take(&mut self.skipping_line) {
                // Tail of an overlong line: poison the frame it belonged to
                self.oversized = true;
                self.payload.get_or_insert_with(String::new);
                continue;
            }

            return Some(text);
        }
    }
}

/// Lazily read frames from a fragment source
///
/// Yields payloads in arrival order. A source error is yielded once and ends
/// the sequence; a clean end of source ends it silently, discarding any
/// unterminated frame. Not restartable: a new source needs a new call.
pub fn frames<S, B, E>(source: S, config: FrameConfig) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    futures::stream::unfold(
        (source, FrameReader::new(config), false),
        |(mut source, mut reader, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(frame) = reader.next_frame() {
                    return Some((Ok(frame), (source, reader, false)));
                }
                match source.next().await {
                    Some(Ok(fragment)) => reader.push(fragment.as_ref()),
                    Some(Err(e)) => return Some((Err(e), (source, reader, true))),
                    None => {
                        if reader.has_partial() {
                            tracing::debug!(
                                pending_bytes = reader.available(),
                                "Source ended mid-frame; discarding partial frame"
                            );
                        }
                        return None;
                    }
                }
            }
        },
    )
}
