// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation persistence
//!
//! [`ConversationRepository`] is the contract the controller and the HTTP
//! layer rely on. [`SqliteStore`] implements it, along with the
//! continuation store, on a single SQLite database.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::stream::frame::ToolTimeline;

pub use sqlite::SqliteStore;

/// Who wrote a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Whether an assistant answer ran to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    Complete,
    /// Cut short by an upstream error, the deadline, or cancellation
    Truncated,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Complete => "complete",
            Completion::Truncated => "truncated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Completion::Complete),
            "truncated" => Some(Completion::Truncated),
            _ => None,
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Tool activity during an assistant turn
    #[serde(default)]
    pub tool_activity: ToolTimeline,
    /// Provider file ids attached to a user turn
    #[serde(default)]
    pub files: Vec<String>,
    /// Model that produced an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub completion: Completion,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            tool_activity: ToolTimeline::new(),
            files,
            model: None,
            completion: Completion::Complete,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_activity: ToolTimeline,
        model: impl Into<String>,
        completion: Completion,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            tool_activity,
            files: Vec::new(),
            model: Some(model.into()),
            completion,
            created_at: Utc::now(),
        }
    }
}

/// A conversation row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub continuation_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry for a user's conversations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationSummary {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            title: c.title,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Conversation storage
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Create a conversation and return its id
    async fn create_conversation(&self, user_id: &str, title: &str) -> Result<Uuid>;

    /// A conversation, if it exists and belongs to `user_id`
    async fn conversation(&self, id: Uuid, user_id: &str) -> Result<Option<Conversation>>;

    /// Append a turn. Fails with `NotFound` for an unknown conversation.
    async fn append_turn(&self, conversation_id: Uuid, turn: &Turn) -> Result<()>;

    /// Overwrite the conversation's continuation token
    async fn update_continuation_token(&self, conversation_id: Uuid, token: &str) -> Result<()>;

    /// A user's conversations, most recently updated first
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>>;

    /// Turns of a conversation owned by `user_id`, in order
    async fn turns(&self, conversation_id: Uuid, user_id: &str) -> Result<Vec<Turn>>;

    /// Delete a conversation and its turns. Returns false if nothing matched.
    async fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool>;
}
