// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model and tool routing
//!
//! [`Router::decide`] is a pure function of its input: no I/O, no clock, no
//! randomness. Index availability is looked up by the caller and passed in.

use serde::{Deserialize, Serialize};

use crate::config::{ModelsConfig, RouterConfig};
use crate::index::IndexHandle;
use crate::stream::frame::ToolKind;

/// Explicit mode flag sent with a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Low-latency model
    Fast,
    /// High-reasoning model
    Deep,
    /// Pick by message complexity
    #[default]
    Auto,
}

impl RouteMode {
    /// Resolve the request's mode fields. `mode` wins over the legacy
    /// boolean; neither means automatic routing.
    pub fn from_request(mode: Option<RouteMode>, use_thinking_mode: Option<bool>) -> Self {
        match (mode, use_thinking_mode) {
            (Some(mode), _) => mode,
            (None, Some(true)) => RouteMode::Deep,
            (None, Some(false)) => RouteMode::Fast,
            (None, None) => RouteMode::Auto,
        }
    }
}

/// Which configured model a turn runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Deep,
}

/// A hosted tool enabled for a turn, with the resources it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSpec {
    DocumentSearch { indexes: Vec<IndexHandle> },
    WebSearch,
    CodeExecution,
}

impl ToolSpec {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolSpec::DocumentSearch { .. } => ToolKind::DocumentSearch,
            ToolSpec::WebSearch => ToolKind::WebSearch,
            ToolSpec::CodeExecution => ToolKind::CodeExecution,
        }
    }
}

/// Everything routing depends on
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub message: &'a str,
    pub mode: RouteMode,
    pub global_index: Option<&'a IndexHandle>,
    pub user_index: Option<&'a IndexHandle>,
    /// Whether this turn carries user-uploaded files
    pub has_files: bool,
}

impl<'a> RouteInput<'a> {
    pub fn new(message: &'a str, mode: RouteMode) -> Self {
        Self {
            message,
            mode,
            global_index: None,
            user_index: None,
            has_files: false,
        }
    }

    pub fn with_global_index(mut self, handle: Option<&'a IndexHandle>) -> Self {
        self.global_index = handle;
        self
    }

    pub fn with_user_files(mut self, handle: Option<&'a IndexHandle>, has_files: bool) -> Self {
        self.user_index = handle;
        self.has_files = has_files;
        self
    }
}

/// Outcome of routing one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub model: String,
    pub tier: ModelTier,
    /// Enabled tools, in a fixed order
    pub tools: Vec<ToolSpec>,
    /// Whether the chosen model's protocol reports tool activity mid-stream
    pub supports_tool_streaming: bool,
}

impl RouteDecision {
    pub fn has_tool(&self, kind: ToolKind) -> bool {
        self.tools.iter().any(|t| t.kind() == kind)
    }
}

/// Selects model and tools for a turn
#[derive(Debug, Clone)]
pub struct Router {
    fast_model: String,
    deep_model: String,
    deep_supports_hosted_tools: bool,
    threshold_chars: usize,
    keywords: Vec<String>,
}

impl Router {
    pub fn new(models: &ModelsConfig, routing: &RouterConfig) -> Self {
        Self {
            fast_model: models.fast.clone(),
            deep_model: models.deep.clone(),
            deep_supports_hosted_tools: models.deep_supports_hosted_tools,
            threshold_chars: routing.complexity_threshold_chars,
            keywords: routing
                .complexity_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Route one turn. Never fails: with no indexes and a model that cannot
    /// stream tool events the tool list is simply empty.
    pub fn decide(&self, input: &RouteInput<'_>) -> RouteDecision {
        let tier = self.tier_for(input.message, input.mode);
        let (model, supports_tool_streaming) = match tier {
            ModelTier::Fast => (self.fast_model.clone(), true),
            ModelTier::Deep => (self.deep_model.clone(), self.deep_supports_hosted_tools),
        };

        let mut tools = Vec::new();

        let mut indexes = Vec::new();
        if let Some(global) = input.global_index {
            indexes.push(global.clone());
        }
        if input.has_files {
            if let Some(user) = input.user_index {
                indexes.push(user.clone());
            }
        }
        if !indexes.is_empty() {
            tools.push(ToolSpec::DocumentSearch { indexes });
        }

        if supports_tool_streaming {
            tools.push(ToolSpec::WebSearch);
            tools.push(ToolSpec::CodeExecution);
        }

        RouteDecision {
            model,
            tier,
            tools,
            supports_tool_streaming,
        }
    }

    /// Model tier for a message under `mode`
    pub fn tier_for(&self, message: &str, mode: RouteMode) -> ModelTier {
        match mode {
            RouteMode::Fast => ModelTier::Fast,
            RouteMode::Deep => ModelTier::Deep,
            RouteMode::Auto if self.needs_deep_reasoning(message) => ModelTier::Deep,
            RouteMode::Auto => ModelTier::Fast,
        }
    }

    /// Complexity score: long messages or analytic-intent keywords
    pub fn needs_deep_reasoning(&self, message: &str) -> bool {
        if message.chars().count() > self.threshold_chars {
            return true;
        }
        let lowered = message.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}
