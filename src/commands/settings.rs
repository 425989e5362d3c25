// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `tally settings`

use std::path::Path;

use crate::cli::args::{SettingsArgs, SettingsCommands};
use crate::config::Settings;
use crate::error::Result;

/// Settings as JSON with any stored API key masked
pub fn redacted_json(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("********".to_string());
    }
    // The map keys are the secrets; user ids stay visible.
    shown.server.tokens = shown
        .server
        .tokens
        .into_values()
        .enumerate()
        .map(|(i, user)| (format!("<token-{}>", i + 1), user))
        .collect();
    Ok(serde_json::to_string_pretty(&shown)?)
}

/// Write default settings to `path`. Returns false if a file was kept.
pub fn init(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    Settings::default().save_to(path)?;
    Ok(true)
}

/// Execute the settings command
pub fn execute(args: &SettingsArgs, settings: &Settings, path: &Path) -> Result<()> {
    match args.command.as_ref().unwrap_or(&SettingsCommands::Show) {
        SettingsCommands::Show => {
            println!("{}", redacted_json(settings)?);
        }
        SettingsCommands::Init { force } => {
            if init(path, *force)? {
                println!("Wrote default settings to {}", path.display());
            } else {
                println!(
                    "Settings already exist at {} (use --force to overwrite)",
                    path.display()
                );
            }
        }
        SettingsCommands::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
