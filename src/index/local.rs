// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Process-local index registry
//!
//! The global handle comes from settings. Per-user handles live in an
//! in-process map with no eviction and no cross-process consistency, so a
//! restart forgets which users have private indexes. Deployments that need
//! more implement [`IndexRegistry`] over their own store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::config::IndexesConfig;
use crate::error::{Result, TallyError};
use crate::index::{IndexHandle, IndexRegistry};

#[derive(Debug, Default)]
struct UserIndex {
    handle: Option<IndexHandle>,
    files: Vec<String>,
}

/// In-memory [`IndexRegistry`]
#[derive(Debug, Default)]
pub struct LocalIndexRegistry {
    global: Option<IndexHandle>,
    users: RwLock<HashMap<String, UserIndex>>,
}

impl LocalIndexRegistry {
    pub fn new(global: Option<IndexHandle>) -> Self {
        Self {
            global,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Build from settings. An explicit id wins over the handle file; a
    /// missing or empty handle file means no global index.
    pub fn from_settings(settings: &IndexesConfig) -> Result<Self> {
        let global = match (&settings.global_index_id, &settings.global_index_file) {
            (Some(id), _) if !id.trim().is_empty() => Some(IndexHandle::new(id.trim())),
            (_, Some(path)) => read_handle_file(path)?,
            _ => None,
        };

        if let Some(ref handle) = global {
            tracing::info!(index = %handle, "Using global document index");
        }

        Ok(Self::new(global))
    }

    /// Files attached by a user, in attach order
    pub fn files(&self, user_id: &str) -> Vec<String> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .get(user_id)
            .map(|u| u.files.clone())
            .unwrap_or_default()
    }
}

fn read_handle_file(path: &Path) -> Result<Option<IndexHandle>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Global index file not found");
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let id = contents.trim();
    Ok((!id.is_empty()).then(|| IndexHandle::new(id)))
}

#[async_trait]
impl IndexRegistry for LocalIndexRegistry {
    async fn global_index(&self) -> Option<IndexHandle> {
        self.global.clone()
    }

    async fn user_index(&self, user_id: &str) -> Option<IndexHandle> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(user_id).and_then(|u| u.handle.clone())
    }

    async fn attach_file(&self, user_id: &str, file_id: &str) -> Result<IndexHandle> {
        let file_id = file_id.trim();
        if file_id.is_empty() {
            return Err(TallyError::InvalidInput("file id must not be empty".into()));
        }

        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let entry = users.entry(user_id.to_string()).or_default();
        let handle = entry
            .handle
            .get_or_insert_with(|| {
                IndexHandle::new(format!("idx_{}", uuid::Uuid::new_v4().simple()))
            })
            .clone();

        if !entry.files.iter().any(|f| f == file_id) {
            entry.files.push(file_id.to_string());
        }

        tracing::debug!(user_id, file_id, index = %handle, "Attached file to user index");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_no_indexes_by_default() {
        let registry = LocalIndexRegistry::default();
        assert!(registry.global_index().await.is_none());
        assert!(registry.user_index("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_global_from_id() {
        let settings = IndexesConfig {
            global_index_id: Some(" vs_course ".to_string()),
            global_index_file: None,
        };
        let registry = LocalIndexRegistry::from_settings(&settings).unwrap();
        assert_eq!(
            registry.global_index().await,
            Some(IndexHandle::new("vs_course"))
        );
    }

    #[tokio::test]
    async fn test_global_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "vs_from_file").unwrap();

        let settings = IndexesConfig {
            global_index_id: None,
            global_index_file: Some(file.path().to_path_buf()),
        };
        let registry = LocalIndexRegistry::from_settings(&settings).unwrap();
        assert_eq!(
            registry.global_index().await,
            Some(IndexHandle::new("vs_from_file"))
        );
    }

    #[tokio::test]
    async fn test_missing_global_file_is_not_an_error() {
        let settings = IndexesConfig {
            global_index_id: None,
            global_index_file: Some("/nonexistent/tally/index.txt".into()),
        };
        let registry = LocalIndexRegistry::from_settings(&settings).unwrap();
        assert!(registry.global_index().await.is_none());
    }

    #[tokio::test]
    async fn test_attach_creates_one_index_per_user() {
        let registry = LocalIndexRegistry::default();
        let first = registry.attach_file("alice", "file-1").await.unwrap();
        let second = registry.attach_file("alice", "file-2").await.unwrap();
        registry.attach_file("alice", "file-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.user_index("alice").await, Some(first));
        assert_eq!(registry.files("alice"), vec!["file-1", "file-2"]);
        assert!(registry.user_index("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_attach_rejects_empty_file_id() {
        let registry = LocalIndexRegistry::default();
        let err = registry.attach_file("alice", "  ").await.unwrap_err();
        assert!(matches!(err, TallyError::InvalidInput(_)));
    }
}
