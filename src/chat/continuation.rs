// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Continuation tokens
//!
//! A conversation's token is written once per completed turn by the one
//! controller driving that conversation, and read before the next turn's
//! request is built. A turn that ends without a token leaves the previous
//! value in place.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// Per-conversation continuation token storage
#[async_trait]
pub trait ContinuationStore: Send + Sync {
    /// The last token stored for the conversation
    async fn get(&self, conversation_id: Uuid) -> Result<Option<String>>;

    /// Overwrite the conversation's token
    async fn set(&self, conversation_id: Uuid, token: &str) -> Result<()>;
}

/// Process-local store.
///
/// No eviction and no cross-process consistency; use a durable
/// implementation where either matters.
#[derive(Debug, Default)]
pub struct InMemoryContinuationStore {
    tokens: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContinuationStore for InMemoryContinuationStore {
    async fn get(&self, conversation_id: Uuid) -> Result<Option<String>> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        Ok(tokens.get(&conversation_id).cloned())
    }

    async fn set(&self, conversation_id: Uuid, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(conversation_id, token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_conversation_has_no_token() {
        let store = InMemoryContinuationStore::new();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryContinuationStore::new();
        let id = Uuid::new_v4();
        store.set(id, "resp_1").await.unwrap();
        store.set(id, "resp_2").await.unwrap();
        assert_eq!(store.get(id).await.unwrap().as_deref(), Some("resp_2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let store = InMemoryContinuationStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.set(a, "resp_a").await.unwrap();
        assert!(store.get(b).await.unwrap().is_none());
    }
}
