// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Incremental decoder for the chat byte stream
//!
//! Reads arrive with arbitrary boundaries: a marker or a UTF-8 sequence may
//! be split across two reads. Ordinary text is released as soon as it can be
//! (only a possible marker prefix or an incomplete UTF-8 tail is held back),
//! so partial answers render with minimal latency.

use chrono::Utc;

use crate::stream::frame::{StreamFrame, ToolTimeline};
use crate::stream::wire::{
    parse_marker_body, FRAME_CLOSE, FRAME_OPEN, FRAME_TERMINATOR, MAX_MARKER_BODY,
};

/// Rebuilds content, tool timeline and continuation token from stream bytes
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    content: String,
    timeline: ToolTimeline,
    continuation: Option<String>,
}

/// Final state of a decoded stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedTurn {
    pub content: String,
    pub timeline: ToolTimeline,
    pub continuation: Option<String>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read from the stream. Returns the frames it completed, with
    /// text released so far as `ContentDelta`s.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(chunk);
        self.drain(false)
    }

    /// Signal end of stream. Anything still buffered, including an
    /// unterminated marker, is released as visible text.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        self.drain(true)
    }

    /// Text rendered so far
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timeline(&self) -> &ToolTimeline {
        &self.timeline
    }

    /// Continuation token, once its marker has been decoded
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Bytes waiting on more input
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_turn(self) -> DecodedTurn {
        DecodedTurn {
            content: self.content,
            timeline: self.timeline,
            continuation: self.continuation,
        }
    }

    fn drain(&mut self, at_eof: bool) -> Vec<StreamFrame> {
        let open = FRAME_OPEN.as_bytes();
        let close = FRAME_CLOSE.as_bytes();
        let terminator = FRAME_TERMINATOR.as_bytes();
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buffer, open) else {
                let hold = if at_eof {
                    0
                } else {
                    partial_suffix_len(&self.buffer, open)
                };
                let len = self.buffer.len() - hold;
                self.release_text(len, at_eof, &mut frames);
                break;
            };

            if start > 0 {
                self.release_text(start, true, &mut frames);
            }

            // The buffer now begins with an open delimiter.
            let body_start = open.len();
            let window_end = (body_start + MAX_MARKER_BODY + close.len()).min(self.buffer.len());
            let Some(body_len) = find(&self.buffer[body_start..window_end], close) else {
                let window_exhausted =
                    self.buffer.len() >= body_start + MAX_MARKER_BODY + close.len();
                if at_eof || window_exhausted {
                    self.release_text(open.len(), true, &mut frames);
                    continue;
                }
                break;
            };

            let body_end = body_start + body_len;
            let mut marker_end = body_end + close.len();
            let rest = &self.buffer[marker_end..];
            if !at_eof && rest.len() < terminator.len() && terminator.starts_with(rest) {
                // Wait for the terminator so it is not rendered as text.
                break;
            }
            if rest.starts_with(terminator) {
                marker_end += terminator.len();
            }

            let parsed = std::str::from_utf8(&self.buffer[body_start..body_end])
                .ok()
                .and_then(parse_marker_body);

            match parsed {
                Some(frame) => {
                    self.buffer.drain(..marker_end);
                    self.apply(&frame);
                    frames.push(frame);
                }
                None => {
                    tracing::debug!(
                        body_len,
                        "Unrecognized marker in stream; passing it through as text"
                    );
                    self.release_text(open.len(), true, &mut frames);
                }
            }
        }

        frames
    }

    fn apply(&mut self, frame: &StreamFrame) {
        match frame {
            StreamFrame::ToolLifecycle { .. } => {
                self.timeline.apply(frame, Utc::now());
            }
            StreamFrame::ContinuationToken(token) => {
                self.continuation = Some(token.clone());
            }
            StreamFrame::ContentDelta(_) => {}
        }
    }

    /// Move up to `len` buffered bytes into content. Unless `flush` is set,
    /// an incomplete trailing UTF-8 sequence stays buffered.
    fn release_text(&mut self, len: usize, flush: bool, frames: &mut Vec<StreamFrame>) {
        let take = if flush {
            len
        } else {
            complete_utf8_prefix(&self.buffer[..len])
        };
        if take == 0 {
            return;
        }

        let bytes: Vec<u8> = self.buffer.drain(..take).collect();
        let text = String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        self.content.push_str(&text);
        frames.push(StreamFrame::ContentDelta(text));
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest suffix of `buf` that is a proper prefix of `pattern`.
fn partial_suffix_len(buf: &[u8], pattern: &[u8]) -> usize {
    let max = pattern.len().saturating_sub(1).min(buf.len());
    (1..=max)
        .rev()
        .find(|&k| buf[buf.len() - k..] == pattern[..k])
        .unwrap_or(0)
}

/// Length of `bytes` minus any incomplete UTF-8 sequence at the end.
/// Invalid sequences in the middle count as complete (they render lossily).
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let mut idx = 0;
    loop {
        match std::str::from_utf8(&bytes[idx..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                None => return idx + e.valid_up_to(),
                Some(invalid) => idx += e.valid_up_to() + invalid,
            },
        }
    }
}
