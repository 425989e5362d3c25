// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `tally conversations`

use crate::cli::args::{ConversationsArgs, ConversationsCommands};
use crate::commands::chat::timeline_lines;
use crate::commands::client_for;
use crate::config::Settings;
use crate::error::Result;
use crate::store::{Completion, ConversationSummary, Role, Turn};

/// One listing line: id, last update, title
pub fn format_summary(summary: &ConversationSummary) -> String {
    format!(
        "{}  {}  {}",
        summary.id,
        summary.updated_at.format("%Y-%m-%d %H:%M"),
        summary.title
    )
}

/// A turn as printed by `conversations show`
pub fn format_turn(turn: &Turn) -> String {
    let mut out = match turn.role {
        Role::User => format!("you: {}", turn.content),
        Role::Assistant => {
            let model = turn.model.as_deref().unwrap_or("assistant");
            format!("tally ({}): {}", model, turn.content)
        }
    };
    for step in timeline_lines(&turn.tool_activity) {
        out.push_str("\n  - ");
        out.push_str(&step);
    }
    if turn.completion == Completion::Truncated {
        out.push_str("\n  (truncated)");
    }
    out
}

/// Execute the conversations command
pub async fn execute(args: ConversationsArgs, settings: Settings) -> Result<()> {
    let client = client_for(&settings, &args.server);
    match args.command {
        ConversationsCommands::List { limit } => {
            let conversations = client.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for summary in conversations.iter().take(limit) {
                println!("{}", format_summary(summary));
            }
        }
        ConversationsCommands::Show { id } => {
            for turn in client.messages(id).await? {
                println!("{}\n", format_turn(&turn));
            }
        }
        ConversationsCommands::Delete { id } => {
            client.delete_conversation(id).await?;
            println!("Deleted conversation {}", id);
        }
    }
    Ok(())
}
