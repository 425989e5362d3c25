// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation turns
//!
//! The controller ties routing, the provider stream, the transcoder and
//! persistence together for one turn at a time per conversation.

pub mod continuation;
pub mod controller;
pub mod request;
pub mod title;

pub use continuation::{ContinuationStore, InMemoryContinuationStore};
pub use controller::{
    ControllerOptions, ConversationController, TurnHandle, TurnState, TurnSubmission, TurnSummary,
};
pub use request::{ChatRequest, CONVERSATION_ID_HEADER, MODEL_HEADER};
pub use title::generate_title;
