// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{Result, TallyError};

use super::Settings;

/// Longest allowed turn deadline (one day)
const MAX_DEADLINE_SECS: u64 = 24 * 60 * 60;

impl Settings {
    /// Get the provider API key, checking env var first.
    pub fn get_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.provider.api_key.clone())
    }

    /// Get the provider base URL, checking env var first.
    pub fn get_base_url(&self) -> String {
        // Priority: env var > config file.
        std::env::var("TALLY_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.provider.base_url.clone())
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.models.fast.trim().is_empty() {
            return Err(TallyError::Config("models.fast must not be empty".into()));
        }
        if self.models.deep.trim().is_empty() {
            return Err(TallyError::Config("models.deep must not be empty".into()));
        }
        if self.turn.deadline_secs == 0 {
            return Err(TallyError::Config(
                "turn.deadline_secs must be greater than zero".into(),
            ));
        }
        if self.turn.deadline_secs > MAX_DEADLINE_SECS {
            return Err(TallyError::Config(format!(
                "turn.deadline_secs must be at most {}",
                MAX_DEADLINE_SECS
            )));
        }
        if self.turn.channel_capacity == 0 {
            return Err(TallyError::Config(
                "turn.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.router.complexity_threshold_chars == 0 {
            return Err(TallyError::Config(
                "router.complexity_threshold_chars must be greater than zero".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(TallyError::Config("server.port must not be zero".into()));
        }
        Ok(())
    }
}
