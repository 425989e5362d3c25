// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Tally
//!
//! Handles loading and saving settings from ~/.tally/settings.json

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

mod io;
mod validation;

/// Main settings structure, stored in ~/.tally/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Upstream LLM provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Fast and deep model selection
    #[serde(default)]
    pub models: ModelsConfig,

    /// Automatic routing thresholds
    #[serde(default)]
    pub router: RouterConfig,

    /// Document search indexes
    #[serde(default)]
    pub indexes: IndexesConfig,

    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-turn limits and instructions
    #[serde(default)]
    pub turn: TurnConfig,

    /// Conversation database
    #[serde(default)]
    pub storage: StorageConfig,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for API (for proxies and test servers)
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
        }
    }
}

/// Model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Low-latency model
    #[serde(default = "default_fast_model")]
    pub fast: String,

    /// High-reasoning model
    #[serde(default = "default_deep_model")]
    pub deep: String,

    /// Whether the deep model reports hosted tool events mid-stream
    #[serde(default)]
    pub deep_supports_hosted_tools: bool,

    /// Maximum output tokens per turn
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling temperature, sent to the fast model only
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            deep: default_deep_model(),
            deep_supports_hosted_tools: false,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Complexity scoring for automatic routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Messages longer than this many characters go to the deep model
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold_chars: usize,

    /// Case-insensitive substrings that mark analytic intent
    #[serde(default = "default_complexity_keywords")]
    pub complexity_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            complexity_threshold_chars: default_complexity_threshold(),
            complexity_keywords: default_complexity_keywords(),
        }
    }
}

/// Where the shared document index comes from
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexesConfig {
    /// Global index id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_index_id: Option<String>,

    /// File holding the global index id (used when no id is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_index_file: Option<PathBuf>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token to user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,

    /// User id for requests without a token (development only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_anonymous_user: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            tokens: HashMap::new(),
            allow_anonymous_user: None,
        }
    }
}

impl ServerConfig {
    /// `bind:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Base URL a local client uses to reach this server
    pub fn local_url(&self) -> String {
        let host = match self.bind.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Per-turn configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Upper bound on one turn, from provider call to last frame
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// System prompt for the fast model
    #[serde(default = "default_instructions_fast")]
    pub instructions_fast: String,

    /// System prompt for the deep model
    #[serde(default = "default_instructions_deep")]
    pub instructions_deep: String,

    /// Unread body chunks buffered before the transcoder waits
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            instructions_fast: default_instructions_fast(),
            instructions_deep: default_instructions_deep(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Conversation storage
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database path (defaults to ~/.tally/tally.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    crate::llm::providers::openai::OPENAI_API_URL.to_string()
}

fn default_fast_model() -> String {
    "gpt-4.1".to_string()
}

fn default_deep_model() -> String {
    "o3".to_string()
}

fn default_max_output_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_complexity_threshold() -> usize {
    600
}

fn default_complexity_keywords() -> Vec<String> {
    [
        "analyze",
        "calculate",
        "breakdown",
        "explain step by step",
        "research",
        "compare",
        "evaluate",
        "plan",
        "strategy",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_deadline_secs() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    64
}

const BASE_INSTRUCTIONS: &str = "You are a financial co-pilot assistant.

Your role is to:
1. Act as a proactive financial strategist and thought partner
2. Analyze financial data, documents, and scenarios
3. Provide step-by-step reasoning and show your calculations
4. Give actionable, specific advice rather than generic responses
5. Use Markdown formatting: headings, bullet points, tables, and code blocks
6. Wrap formulas in dollar signs: $formula$ inline, $$formula$$ for display";

fn default_instructions_fast() -> String {
    format!(
        "{}\n\nUse web search for current market data, interest rates, and economic news. \
Search course materials for educational content and principles. \
Cite sources when referencing uploaded files or web results.",
        BASE_INSTRUCTIONS
    )
}

fn default_instructions_deep() -> String {
    format!(
        "{}\n\nWork through the problem carefully before answering.",
        BASE_INSTRUCTIONS
    )
}
