// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Subcommand implementations

pub mod chat;
pub mod conversations;
pub mod serve;
pub mod settings;

use std::path::{Path, PathBuf};

use crate::cli::args::ServerArgs;
use crate::client::ChatClient;
use crate::config::Settings;
use crate::error::Result;

/// Settings file in effect: `--config` if given, else the default path
pub fn settings_path(config: Option<&Path>) -> PathBuf {
    config
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_path)
}

/// Load settings from the effective path
pub fn load_settings(config: Option<&Path>) -> Result<Settings> {
    Settings::load_from(&settings_path(config))
}

/// Client for the server named on the command line, or the configured one
pub fn client_for(settings: &Settings, args: &ServerArgs) -> ChatClient {
    let base_url = args
        .server
        .clone()
        .unwrap_or_else(|| settings.server.local_url());
    ChatClient::new(base_url).with_token(args.token.clone())
}
