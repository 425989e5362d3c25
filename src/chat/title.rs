// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation titles from the first message

const MAX_TITLE_CHARS: usize = 50;
const TRUNCATED_CHARS: usize = 47;
/// A word break is only used if it keeps more than this many characters
const MIN_WORD_BREAK: usize = 20;

/// Title used when the message has no visible text
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Derive a title: newlines become spaces, and long messages are cut at a
/// word boundary where one is close enough, then marked with `...`.
pub fn generate_title(first_message: &str) -> String {
    let cleaned = first_message.replace(['\r', '\n'], " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if cleaned.chars().count() <= MAX_TITLE_CHARS {
        return cleaned.to_string();
    }

    let truncated: String = cleaned.chars().take(TRUNCATED_CHARS).collect();
    match truncated.rfind(' ') {
        Some(space) if truncated[..space].chars().count() > MIN_WORD_BREAK => {
            format!("{}...", &truncated[..space])
        }
        _ => format!("{}...", truncated),
    }
}
