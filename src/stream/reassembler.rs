//! SSE stream reassembler for chat completions.
//!
//! Turns raw response bytes into an ordered sequence of classified text
//! deltas. Frames may be split anywhere across network chunks; the trailing
//! partial frame stays buffered until its `\n\n` separator arrives.

use serde::Serialize;
use tracing::{debug, warn};

use super::decoder::Utf8StreamDecoder;
use super::frame::{decode_frame, FramePayload};

pub const FRAME_SEPARATOR: &str = "\n\n";
pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Classification of one decoded delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaMode {
    ThinkingStart,
    ThinkingChunk,
    ThinkingEnd,
    AnswerChunk,
    /// Terminal marker: `[DONE]` or end of transport.
    Empty,
}

impl DeltaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThinkingStart => "thinking-start",
            Self::ThinkingChunk => "thinking-chunk",
            Self::ThinkingEnd => "thinking-end",
            Self::AnswerChunk => "answer-chunk",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for DeltaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One classified delta. For marker chunks the text is the marker itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaChunk {
    pub mode: DeltaMode,
    pub text: String,
}

impl DeltaChunk {
    fn new(mode: DeltaMode, text: impl Into<String>) -> Self {
        Self {
            mode,
            text: text.into(),
        }
    }

    pub fn terminal() -> Self {
        Self::new(DeltaMode::Empty, "")
    }

    pub fn is_terminal(&self) -> bool {
        self.mode == DeltaMode::Empty
    }
}

/// Decode state for one streaming request.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Decoded text not yet resolved into complete frames.
    buffer: String,
    in_thinking_mode: bool,
    /// Append-only reconstruction of everything emitted so far.
    accumulated_text: String,
}

impl StreamState {
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn in_thinking_mode(&self) -> bool {
        self.in_thinking_mode
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }
}

/// Incremental decoder for one SSE response body.
pub struct StreamReassembler {
    decoder: Utf8StreamDecoder,
    state: StreamState,
    /// Set once `[DONE]` was seen or `finish` ran.
    done: bool,
    /// Frames that failed every JSON recovery strategy.
    dropped_frames: u32,
    /// Frames that produced a delta chunk.
    frame_count: u32,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self {
            decoder: Utf8StreamDecoder::new(),
            state: StreamState::default(),
            done: false,
            dropped_frames: 0,
            frame_count: 0,
        }
    }

    /// Feed the next network chunk and return the deltas of every frame it
    /// completed. After the terminal chunk further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DeltaChunk> {
        if self.done {
            if !chunk.is_empty() {
                debug!(bytes = chunk.len(), "ignoring bytes after end of stream");
            }
            return Vec::new();
        }

        let text = self.decoder.decode(chunk);
        self.state.buffer.push_str(&text);

        let mut parts: Vec<&str> = self.state.buffer.split(FRAME_SEPARATOR).collect();
        // The last segment may still be an incomplete frame
        let tail = parts.pop().unwrap_or_default().to_string();
        let frames: Vec<String> = parts.into_iter().map(str::to_string).collect();
        self.state.buffer = tail;

        let mut out = Vec::new();
        for frame in &frames {
            if let Some(delta) = self.process_frame(frame) {
                let terminal = delta.is_terminal();
                out.push(delta);
                if terminal {
                    break;
                }
            }
        }
        out
    }

    /// Flush at transport end. Resolves a final unterminated frame if one is
    /// left and always ends with the terminal chunk unless `[DONE]` was
    /// already emitted.
    pub fn finish(&mut self) -> Vec<DeltaChunk> {
        if self.done {
            return Vec::new();
        }

        let flushed = self.decoder.finish();
        self.state.buffer.push_str(&flushed);

        let leftover = std::mem::take(&mut self.state.buffer);
        let mut out = Vec::new();

        let frame = leftover.trim_end_matches('\n');
        if !frame.trim().is_empty() {
            warn!(
                bytes = leftover.len(),
                "stream ended with an unterminated frame in the buffer"
            );
            if let Some(delta) = self.process_frame(frame) {
                out.push(delta);
            }
        }

        if !self.done {
            self.done = true;
            out.push(DeltaChunk::terminal());
        }
        out
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn accumulated_text(&self) -> &str {
        &self.state.accumulated_text
    }

    pub fn in_thinking_mode(&self) -> bool {
        self.state.in_thinking_mode
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn dropped_frames(&self) -> u32 {
        self.dropped_frames
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn process_frame(&mut self, frame: &str) -> Option<DeltaChunk> {
        match decode_frame(frame) {
            FramePayload::Ignored => None,
            FramePayload::Malformed => {
                self.dropped_frames += 1;
                None
            }
            FramePayload::Done => {
                debug!("received [DONE]");
                self.done = true;
                Some(DeltaChunk::terminal())
            }
            FramePayload::Delta(raw) => {
                self.frame_count += 1;
                let chunk = self.classify(raw);
                self.state.accumulated_text.push_str(&chunk.text);
                debug!(
                    mode = %chunk.mode,
                    len = chunk.text.len(),
                    total = self.state.accumulated_text.len(),
                    "delta"
                );
                Some(chunk)
            }
        }
    }

    /// A delta containing a marker contributes only the marker; any text
    /// next to it in the same delta is not kept.
    fn classify(&mut self, raw: String) -> DeltaChunk {
        if raw.contains(THINK_OPEN) {
            self.state.in_thinking_mode = true;
            DeltaChunk::new(DeltaMode::ThinkingStart, THINK_OPEN)
        } else if raw.contains(THINK_CLOSE) {
            self.state.in_thinking_mode = false;
            DeltaChunk::new(DeltaMode::ThinkingEnd, THINK_CLOSE)
        } else if self.state.in_thinking_mode {
            DeltaChunk::new(DeltaMode::ThinkingChunk, raw)
        } else {
            DeltaChunk::new(DeltaMode::AnswerChunk, raw)
        }
    }
}
