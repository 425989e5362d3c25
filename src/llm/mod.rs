// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Tally
//!
//! Provides abstraction over the upstream model provider.

pub mod mock_provider;
pub mod provider;
pub mod providers;

pub use provider::*;
