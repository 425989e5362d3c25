// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM Provider trait and related types
//!
//! Providers expose two streaming call shapes. The delta-only shape yields
//! plain text fragments. The rich shape yields typed events (text, hosted
//! tool items, completion) and accepts a continuation token.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::router::ToolSpec;

/// Stream of text fragments from the delta-only protocol
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of typed events from the rich-event protocol
pub type RichStream = Pin<Box<dyn Stream<Item = Result<RichEvent>> + Send>>;

/// Main trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai")
    fn name(&self) -> &str;

    /// Open a plain text stream. Tools and continuation tokens are not part
    /// of this protocol and are ignored.
    async fn stream_delta_only(&self, request: TurnRequest) -> Result<DeltaStream>;

    /// Open a typed event stream with hosted tools and conversation state.
    async fn stream_rich(&self, request: TurnRequest) -> Result<RichStream>;
}

/// One provider call
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    /// Model to use
    pub model: String,

    /// System prompt
    pub instructions: Option<String>,

    /// The user's message for this turn
    pub input: String,

    /// Hosted tools to enable
    pub tools: Vec<ToolSpec>,

    /// Token returned at the end of the previous turn
    pub previous_response_id: Option<String>,

    /// Maximum tokens in response
    pub max_output_tokens: u32,

    /// Sampling temperature, for models that accept one
    pub temperature: Option<f32>,
}

impl TurnRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: input.into(),
            tools: Vec::new(),
            previous_response_id: None,
            max_output_tokens: 2000,
            temperature: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_previous_response(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Kind of a hosted-tool output item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    WebSearch,
    FileSearch,
    CodeInterpreter,
    /// Messages, reasoning, and item types this crate does not know
    Other(String),
}

impl ItemKind {
    /// Map a provider item type string
    pub fn from_type(item_type: &str) -> Self {
        match item_type {
            "web_search_call" => ItemKind::WebSearch,
            "file_search_call" => ItemKind::FileSearch,
            "code_interpreter_call" => ItemKind::CodeInterpreter,
            other => ItemKind::Other(other.to_string()),
        }
    }
}

/// Typed event from the rich-event protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RichEvent {
    /// Incremental answer text
    TextDelta(String),
    /// An output item started
    ItemAdded(ItemKind),
    /// An output item finished; `queries` carries search queries if any
    ItemDone { kind: ItemKind, queries: Vec<String> },
    /// The response finished and can be continued with `response_id`
    Completed { response_id: String },
    /// Anything else
    Ignored(String),
}
