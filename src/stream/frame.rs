// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Canonical frame alphabet and tool-activity timeline
//!
//! Both ends of the chat stream speak in [`StreamFrame`]s: the transcoder
//! produces them from provider events, the decoder rebuilds them from bytes.
//! [`ToolTimeline`] holds the lifecycle rules shared by both sides so the
//! persisted timeline and the one a client renders agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary sent when a web search reports no queries
pub const WEB_SEARCH_PLACEHOLDER: &str = "current information";
/// Summary sent for every document search completion
pub const DOCUMENT_SEARCH_PLACEHOLDER: &str = "course materials";
/// Summary sent for every code execution completion
pub const CODE_EXECUTION_PLACEHOLDER: &str = "calculations";

/// A provider-hosted capability whose invocation is reported mid-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    DocumentSearch,
    CodeExecution,
}

impl ToolKind {
    /// All tool kinds, in the order the router attaches them
    pub const ALL: [ToolKind; 3] = [
        ToolKind::DocumentSearch,
        ToolKind::WebSearch,
        ToolKind::CodeExecution,
    ];

    /// Wire name of this tool kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::DocumentSearch => "document_search",
            ToolKind::CodeExecution => "code_execution",
        }
    }

    /// The fixed "no specific detail" summary for this kind
    pub fn placeholder_summary(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => WEB_SEARCH_PLACEHOLDER,
            ToolKind::DocumentSearch => DOCUMENT_SEARCH_PLACEHOLDER,
            ToolKind::CodeExecution => CODE_EXECUTION_PLACEHOLDER,
        }
    }

    /// Human-readable progress label
    pub fn activity_label(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "Searching the web",
            ToolKind::DocumentSearch => "Searching course materials",
            ToolKind::CodeExecution => "Running calculations",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `summary` is one of the fixed placeholder strings.
pub fn is_placeholder_summary(summary: &str) -> bool {
    matches!(
        summary,
        WEB_SEARCH_PLACEHOLDER | DOCUMENT_SEARCH_PLACEHOLDER | CODE_EXECUTION_PLACEHOLDER
    )
}

/// Lifecycle state of a tool activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Active,
    Completed,
}

/// One unit of the multiplexed chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Answer text, written raw on the wire
    ContentDelta(String),
    /// A tool started or finished
    ToolLifecycle {
        kind: ToolKind,
        state: ToolState,
        summary: Option<String>,
    },
    /// Opaque provider handle for continuing the conversation
    ContinuationToken(String),
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        StreamFrame::ContentDelta(text.into())
    }

    pub fn tool_started(kind: ToolKind) -> Self {
        StreamFrame::ToolLifecycle {
            kind,
            state: ToolState::Active,
            summary: None,
        }
    }

    pub fn tool_completed(kind: ToolKind, summary: impl Into<String>) -> Self {
        StreamFrame::ToolLifecycle {
            kind,
            state: ToolState::Completed,
            summary: Some(summary.into()),
        }
    }

    pub fn continuation(token: impl Into<String>) -> Self {
        StreamFrame::ContinuationToken(token.into())
    }
}

/// One invocation of a tool during a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolActivity {
    pub kind: ToolKind,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ToolActivity {
    /// Progress line for display, e.g. `Web search complete: "mortgage rates"`
    pub fn describe(&self) -> String {
        let base = self.kind.activity_label();
        match (self.state, self.kind, self.summary.as_deref()) {
            (ToolState::Completed, ToolKind::WebSearch, Some(query)) => {
                format!("Web search complete: \"{}\"", query)
            }
            (ToolState::Completed, _, _) => format!("{} complete", base),
            (ToolState::Active, _, _) => format!("{}...", base),
        }
    }
}

/// Ordered tool activity for one turn, in order of first appearance.
///
/// At most one record per kind is active at a time, and a completed record
/// is never reopened: a start for a kind whose record already completed
/// begins a new record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolTimeline {
    records: Vec<ToolActivity>,
}

impl ToolTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start for `kind`. Returns false when a record for that kind
    /// is already active (duplicate start signal).
    pub fn start(&mut self, kind: ToolKind, at: DateTime<Utc>) -> bool {
        if self.is_active(kind) {
            return false;
        }
        self.records.push(ToolActivity {
            kind,
            state: ToolState::Active,
            summary: None,
            started_at: at,
        });
        true
    }

    /// Complete the most recent active record for `kind`.
    ///
    /// Placeholder summaries are dropped. Returns false when no record for
    /// that kind is active, which makes re-delivered completions no-ops.
    pub fn complete(&mut self, kind: ToolKind, summary: Option<&str>) -> bool {
        let Some(record) = self
            .records
            .iter_mut()
            .rev()
            .find(|r| r.kind == kind && r.state == ToolState::Active)
        else {
            return false;
        };

        record.state = ToolState::Completed;
        record.summary = summary
            .map(str::trim)
            .filter(|s| !s.is_empty() && !is_placeholder_summary(s))
            .map(str::to_string);
        true
    }

    /// Apply a lifecycle frame. Non-lifecycle frames are ignored.
    pub fn apply(&mut self, frame: &StreamFrame, at: DateTime<Utc>) -> bool {
        match frame {
            StreamFrame::ToolLifecycle {
                kind,
                state: ToolState::Active,
                ..
            } => self.start(*kind, at),
            StreamFrame::ToolLifecycle {
                kind,
                state: ToolState::Completed,
                summary,
            } => self.complete(*kind, summary.as_deref()),
            _ => false,
        }
    }

    pub fn is_active(&self, kind: ToolKind) -> bool {
        self.records
            .iter()
            .any(|r| r.kind == kind && r.state == ToolState::Active)
    }

    pub fn active_count(&self, kind: ToolKind) -> usize {
        self.records
            .iter()
            .filter(|r| r.kind == kind && r.state == ToolState::Active)
            .count()
    }

    pub fn records(&self) -> &[ToolActivity] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<ToolActivity>> for ToolTimeline {
    fn from(records: Vec<ToolActivity>) -> Self {
        Self { records }
    }
}
