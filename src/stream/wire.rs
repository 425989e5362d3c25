// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Marker encoding for the chat byte stream
//!
//! Content is written raw. Control frames are written as
//! `FRAME_OPEN <json envelope> FRAME_CLOSE FRAME_TERMINATOR`. The envelope is
//! serialized with `serde_json`, which escapes every control character, so
//! the record-separator byte used by the delimiters can never occur inside
//! an envelope.

use serde::{Deserialize, Serialize};

use crate::stream::frame::{StreamFrame, ToolKind, ToolState};

/// Opens a control marker
pub const FRAME_OPEN: &str = "\u{1e}\u{1e}tally:";
/// Closes a control marker
pub const FRAME_CLOSE: &str = "\u{1e}\u{1e}";
/// Follows every marker
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Upper bound on a marker body; longer "markers" are treated as text.
pub const MAX_MARKER_BODY: usize = 16 * 1024;

/// Typed envelope carried inside a marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum Envelope {
    ToolStart { tool: ToolKind },
    ToolDone { tool: ToolKind, summary: String },
    Continue { token: String },
}

/// Encode a frame for the wire.
pub fn encode_frame(frame: &StreamFrame) -> String {
    match frame {
        StreamFrame::ContentDelta(text) => text.clone(),
        StreamFrame::ToolLifecycle {
            kind,
            state: ToolState::Active,
            ..
        } => encode_envelope(&Envelope::ToolStart { tool: *kind }),
        StreamFrame::ToolLifecycle {
            kind,
            state: ToolState::Completed,
            summary,
        } => encode_envelope(&Envelope::ToolDone {
            tool: *kind,
            summary: summary
                .clone()
                .unwrap_or_else(|| kind.placeholder_summary().to_string()),
        }),
        StreamFrame::ContinuationToken(token) => encode_envelope(&Envelope::Continue {
            token: token.clone(),
        }),
    }
}

fn encode_envelope(envelope: &Envelope) -> String {
    // Serializing a derive-only enum of strings cannot fail.
    let body = serde_json::to_string(envelope).unwrap_or_default();
    let mut out =
        String::with_capacity(FRAME_OPEN.len() + body.len() + FRAME_CLOSE.len() + 2);
    out.push_str(FRAME_OPEN);
    out.push_str(&body);
    out.push_str(FRAME_CLOSE);
    out.push_str(FRAME_TERMINATOR);
    out
}

/// Parse a marker body (the bytes between the delimiters).
///
/// Returns `None` for anything that is not a well-formed envelope.
pub fn parse_marker_body(body: &str) -> Option<StreamFrame> {
    let envelope: Envelope = serde_json::from_str(body).ok()?;
    Some(match envelope {
        Envelope::ToolStart { tool } => StreamFrame::tool_started(tool),
        Envelope::ToolDone { tool, summary } => StreamFrame::tool_completed(tool, summary),
        Envelope::Continue { token } => StreamFrame::continuation(token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(marker: &str) -> &str {
        marker
            .strip_prefix(FRAME_OPEN)
            .and_then(|s| s.strip_suffix(FRAME_TERMINATOR))
            .and_then(|s| s.strip_suffix(FRAME_CLOSE))
            .expect("well-formed marker")
    }

    #[test]
    fn test_content_is_written_raw() {
        assert_eq!(encode_frame(&StreamFrame::content("Rates rose")), "Rates rose");
    }

    #[test]
    fn test_tool_start_marker_shape() {
        let marker = encode_frame(&StreamFrame::tool_started(ToolKind::WebSearch));
        assert!(marker.starts_with(FRAME_OPEN));
        assert!(marker.ends_with("\u{1e}\u{1e}\n\n"));
        assert_eq!(
            body_of(&marker),
            r#"{"frame":"tool_start","tool":"web_search"}"#
        );
    }

    #[test]
    fn test_tool_done_without_summary_uses_placeholder() {
        let marker = encode_frame(&StreamFrame::ToolLifecycle {
            kind: ToolKind::CodeExecution,
            state: ToolState::Completed,
            summary: None,
        });
        let frame = parse_marker_body(body_of(&marker)).unwrap();
        assert_eq!(
            frame,
            StreamFrame::tool_completed(ToolKind::CodeExecution, "calculations")
        );
    }

    #[test]
    fn test_summary_with_control_characters_stays_inside_envelope() {
        let summary = "rates\u{1e}\u{1e}\n\nand more";
        let marker = encode_frame(&StreamFrame::tool_completed(ToolKind::WebSearch, summary));
        let body = body_of(&marker);
        assert!(!body.contains('\u{1e}'));
        assert_eq!(
            parse_marker_body(body),
            Some(StreamFrame::tool_completed(ToolKind::WebSearch, summary))
        );
    }

    #[test]
    fn test_continuation_marker() {
        let marker = encode_frame(&StreamFrame::continuation("resp_abc123"));
        assert_eq!(
            parse_marker_body(body_of(&marker)),
            Some(StreamFrame::continuation("resp_abc123"))
        );
    }

    #[test]
    fn test_malformed_bodies_are_rejected() {
        assert!(parse_marker_body("").is_none());
        assert!(parse_marker_body("not json").is_none());
        assert!(parse_marker_body(r#"{"frame":"tool_start","tool":"telepathy"}"#).is_none());
        assert!(parse_marker_body(r#"{"frame":"mystery"}"#).is_none());
    }
}
