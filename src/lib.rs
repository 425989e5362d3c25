// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tally - streaming chat with resumable conversations.
//!
//! A turn's provider event stream (text, hosted tool activity, completion)
//! is multiplexed onto one plain-text HTTP body and decoded back on the
//! client. Conversations continue across turns through the provider's
//! continuation token instead of resending history.
//!
//! Architecture highlights:
//! - `router`: pure model and tool selection per turn
//! - `stream`: frame alphabet, wire markers, transcoder and decoder
//! - `chat`: conversation controller, continuation store, titles
//! - `llm`: provider abstraction, OpenAI implementation, scripted mock
//! - `store`, `index`: persistence and search-index collaborators
//! - `server`, `client`: the HTTP surface and its terminal client

pub mod chat;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod index;
pub mod llm;
pub mod router;
pub mod server;
pub mod store;
pub mod stream;

pub use error::{Result, TallyError};
