// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Tally.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::router::RouteMode;

/// Tally - streaming financial co-pilot
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about = "Streaming financial co-pilot with resumable conversations")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),

    /// Interactive chat against a running server
    Chat(ChatArgs),

    /// Ask a single question (non-interactive)
    Ask(AskArgs),

    /// Conversation management
    #[command(alias = "conv")]
    Conversations(ConversationsArgs),

    /// Show or initialize configuration
    #[command(alias = "config")]
    Settings(SettingsArgs),
}

/// Arguments for the serve subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides settings)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides settings)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database path (overrides settings)
    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,
}

/// Connection options shared by client subcommands
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Server base URL (defaults to the configured bind address)
    #[arg(long, env = "TALLY_SERVER")]
    pub server: Option<String>,

    /// Bearer token
    #[arg(long, env = "TALLY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Initial prompt (optional)
    pub prompt: Option<String>,

    /// Continue an existing conversation
    #[arg(long)]
    pub conversation: Option<Uuid>,

    /// Routing mode
    #[arg(short, long, value_enum)]
    pub mode: Option<RouteMode>,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Arguments for the ask subcommand
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: Option<String>,

    /// Continue an existing conversation
    #[arg(long)]
    pub conversation: Option<Uuid>,

    /// Routing mode
    #[arg(short, long, value_enum)]
    pub mode: Option<RouteMode>,

    /// Provider file ids to attach to this turn
    #[arg(short, long, num_args = 1..)]
    pub file: Vec<String>,

    /// Read prompt from stdin
    #[arg(long)]
    pub stdin: bool,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Arguments for conversation management
#[derive(clap::Args, Debug)]
pub struct ConversationsArgs {
    #[command(subcommand)]
    pub command: ConversationsCommands,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Conversation subcommands
#[derive(Subcommand, Debug)]
pub enum ConversationsCommands {
    /// List conversations, most recent first
    List {
        /// Maximum number of conversations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the turns of a conversation
    Show {
        /// Conversation ID
        id: Uuid,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID
        id: Uuid,
    },
}

/// Arguments for settings
#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: Option<SettingsCommands>,
}

/// Settings subcommands
#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print the effective settings as JSON
    Show,

    /// Write a default settings file if none exists
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the settings file path
    Path,
}
