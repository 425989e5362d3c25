// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `tally serve`

use std::sync::Arc;
use tokio::net::TcpListener;

use crate::chat::ConversationController;
use crate::cli::args::ServeArgs;
use crate::config::Settings;
use crate::error::{Result, TallyError};
use crate::index::LocalIndexRegistry;
use crate::llm::providers::OpenAiProvider;
use crate::server::{self, AppState, BearerTokenIdentity};
use crate::store::SqliteStore;

/// Apply command-line overrides to the loaded settings
pub fn apply_overrides(settings: &mut Settings, args: &ServeArgs) {
    if let Some(bind) = &args.bind {
        settings.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(database) = &args.database {
        settings.storage.database_path = Some(database.clone());
    }
}

/// Wire up the service from settings
pub fn build_state(settings: &Settings) -> Result<AppState> {
    let api_key = settings.get_api_key().ok_or_else(|| {
        TallyError::Config(format!(
            "No API key configured. Set {} or provider.api_key in settings.",
            settings.provider.api_key_env
        ))
    })?;
    let provider = Arc::new(OpenAiProvider::with_base_url(api_key, settings.get_base_url()));

    let database = settings.database_path();
    let store = Arc::new(SqliteStore::open(&database)?);
    tracing::info!(path = %database.display(), "conversation database opened");

    let indexes = Arc::new(LocalIndexRegistry::from_settings(&settings.indexes)?);

    let controller = ConversationController::from_settings(
        settings,
        provider,
        store.clone(),
        store,
        indexes,
    );

    tracing::info!(
        provider = controller.provider_name(),
        fast = %settings.models.fast,
        deep = %settings.models.deep,
        "conversation controller ready"
    );

    if settings.server.tokens.is_empty() && settings.server.allow_anonymous_user.is_none() {
        tracing::warn!("No bearer tokens or anonymous user configured; every request will be rejected");
    }
    let identity = Arc::new(BearerTokenIdentity::from_settings(&settings.server));

    Ok(AppState::new(Arc::new(controller), identity))
}

/// Execute the serve command
pub async fn execute(args: &ServeArgs, mut settings: Settings) -> Result<()> {
    apply_overrides(&mut settings, args);
    settings.validate()?;
    Settings::ensure_directories()?;

    let state = build_state(&settings)?;
    let listener = TcpListener::bind(settings.server.address()).await?;

    println!("Tally listening on {}", settings.server.local_url());
    server::serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler: run until the process is killed.
            futures::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_apply_overrides() {
        let mut settings = Settings::default();
        let args = ServeArgs {
            bind: Some("0.0.0.0".into()),
            port: Some(9100),
            database: Some(PathBuf::from("/tmp/tally-test.db")),
        };
        apply_overrides(&mut settings, &args);
        assert_eq!(settings.server.address(), "0.0.0.0:9100");
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/tally-test.db"));
    }

    #[test]
    fn test_no_overrides_keeps_settings() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, &ServeArgs::default());
        assert_eq!(settings.server.port, 8787);
    }
}
