// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Search-index registry
//!
//! Document search runs against provider-side indexes. The registry only
//! hands out their handles: one shared index with course material and one
//! per user for the files they attach.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::LocalIndexRegistry;

/// Opaque identifier of a provider-side search index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexHandle(String);

impl IndexHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup of search-index handles
#[async_trait]
pub trait IndexRegistry: Send + Sync {
    /// The shared index, if one is configured
    async fn global_index(&self) -> Option<IndexHandle>;

    /// The user's private index, if they have attached any file
    async fn user_index(&self, user_id: &str) -> Option<IndexHandle>;

    /// Attach an already-uploaded provider file to the user's index,
    /// creating the index on first use.
    async fn attach_file(&self, user_id: &str, file_id: &str) -> Result<IndexHandle>;
}
