// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use tally::config::Settings;
use tally::chat::ContinuationStore;
use tally::index::{IndexRegistry, LocalIndexRegistry};
use tally::store::{ConversationRepository, SqliteStore};

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(settings.models.fast, "gpt-4.1");
    assert_eq!(settings.models.deep, "o3");
    assert_eq!(settings.models.max_output_tokens, 2000);
    assert!((settings.models.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(settings.router.complexity_threshold_chars, 600);
    assert!(settings
        .router
        .complexity_keywords
        .contains(&"calculate".to_string()));
    assert_eq!(settings.server.address(), "127.0.0.1:8787");
    assert!(settings.server.tokens.is_empty());
}

#[test]
fn test_settings_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"server":{"port":9100,"tokens":{"tok-1":"alice"}},"turn":{"deadline_secs":30}}"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.server.port, 9100);
    assert_eq!(settings.server.tokens.get("tok-1").unwrap(), "alice");
    assert_eq!(settings.turn.deadline_secs, 30);
    assert_eq!(settings.turn.channel_capacity, 64);
    assert_eq!(settings.models.fast, "gpt-4.1");
    assert!(settings.validate().is_ok());
}

#[test]
fn test_settings_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
    assert_eq!(settings.server.port, 8787);
}

#[test]
fn test_settings_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load_from(&path).is_err());
}

#[test]
fn test_settings_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let mut settings = Settings::default();
    settings.models.deep = "o3-pro".to_string();
    settings.server.allow_anonymous_user = Some("dev".to_string());
    settings.save_to(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.models.deep, "o3-pro");
    assert_eq!(loaded.server.allow_anonymous_user.as_deref(), Some("dev"));
}

#[test]
fn test_settings_api_key_priority() {
    // A dedicated variable name keeps this test independent of the environment.
    let mut settings = Settings::default();
    settings.provider.api_key_env = "TALLY_TEST_API_KEY_31337".to_string();
    settings.provider.api_key = Some("config-key".to_string());

    std::env::remove_var("TALLY_TEST_API_KEY_31337");
    assert_eq!(settings.get_api_key(), Some("config-key".to_string()));

    std::env::set_var("TALLY_TEST_API_KEY_31337", "env-key");
    assert_eq!(settings.get_api_key(), Some("env-key".to_string()));

    // Blank env values fall through to the file.
    std::env::set_var("TALLY_TEST_API_KEY_31337", "  ");
    assert_eq!(settings.get_api_key(), Some("config-key".to_string()));

    std::env::remove_var("TALLY_TEST_API_KEY_31337");
}

#[test]
fn test_database_path_override() {
    let mut settings = Settings::default();
    settings.storage.database_path = Some("/tmp/tally-test.db".into());
    assert_eq!(
        settings.database_path(),
        std::path::PathBuf::from("/tmp/tally-test.db")
    );
}

#[tokio::test]
async fn test_global_index_from_handle_file() {
    let dir = tempfile::tempdir().unwrap();
    let handle_file = dir.path().join("vector_store_id.txt");
    std::fs::write(&handle_file, "vs_course\n").unwrap();

    let mut settings = Settings::default();
    settings.indexes.global_index_file = Some(handle_file.clone());
    let registry = LocalIndexRegistry::from_settings(&settings.indexes).unwrap();
    assert_eq!(
        registry.global_index().await.map(|h| h.to_string()),
        Some("vs_course".to_string())
    );

    // An explicit id wins over the file.
    settings.indexes.global_index_id = Some("vs_explicit".to_string());
    let registry = LocalIndexRegistry::from_settings(&settings.indexes).unwrap();
    assert_eq!(
        registry.global_index().await.map(|h| h.to_string()),
        Some("vs_explicit".to_string())
    );

    // A missing file means no global index.
    settings.indexes.global_index_id = None;
    settings.indexes.global_index_file = Some(dir.path().join("absent.txt"));
    let registry = LocalIndexRegistry::from_settings(&settings.indexes).unwrap();
    assert!(registry.global_index().await.is_none());
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        let id = store
            .create_conversation("alice", "Budget review")
            .await
            .unwrap();
        store.set(id, "resp_42").await.unwrap();
        id
    };

    let store = SqliteStore::open(&path).unwrap();
    let listed = store.list_conversations("alice").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].title, "Budget review");
    assert_eq!(
        ContinuationStore::get(&store, id).await.unwrap().as_deref(),
        Some("resp_42")
    );
}
