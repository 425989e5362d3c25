// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Request body of `POST /api/chat`, shared by the server and the client

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::RouteMode;

/// Response header carrying the conversation id of a turn
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// Response header carrying the model a turn was routed to
pub const MODEL_HEADER: &str = "x-model";

/// One chat turn as sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,

    /// Existing conversation; a new one is created when absent
    #[serde(default, alias = "conversationId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,

    /// Provider file ids attached to this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RouteMode>,

    /// Legacy deep-mode flag, used only when `mode` is absent
    #[serde(default, alias = "useThinkingMode", skip_serializing_if = "Option::is_none")]
    pub use_thinking_mode: Option<bool>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            files: Vec::new(),
            mode: None,
            use_thinking_mode: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: Option<Uuid>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_mode(mut self, mode: RouteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Effective routing mode
    pub fn route_mode(&self) -> RouteMode {
        RouteMode::from_request(self.mode, self.use_thinking_mode)
    }
}
