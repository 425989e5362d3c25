// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Caller identity
//!
//! Authentication itself lives outside this service. Requests carry an
//! `Authorization: Bearer <token>` header that maps to a user id.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::collections::HashMap;

use crate::config::ServerConfig;
use crate::error::{Result, TallyError};
use crate::server::AppState;

/// Resolves the user behind a request
pub trait IdentityProvider: Send + Sync {
    /// The caller's user id, or `Unauthenticated`
    fn current_user_id(&self, headers: &HeaderMap) -> Result<String>;
}

/// Static bearer-token table with an optional anonymous fallback
#[derive(Debug, Clone, Default)]
pub struct BearerTokenIdentity {
    tokens: HashMap<String, String>,
    anonymous: Option<String>,
}

impl BearerTokenIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens,
            anonymous: None,
        }
    }

    /// Requests without any token act as `user_id`
    pub fn with_anonymous_user(mut self, user_id: Option<String>) -> Self {
        self.anonymous = user_id.filter(|u| !u.is_empty());
        self
    }

    pub fn from_settings(server: &ServerConfig) -> Self {
        Self::new(server.tokens.clone()).with_anonymous_user(server.allow_anonymous_user.clone())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl IdentityProvider for BearerTokenIdentity {
    fn current_user_id(&self, headers: &HeaderMap) -> Result<String> {
        if headers.contains_key(AUTHORIZATION) {
            // A presented credential must be valid; no fallback.
            return bearer_token(headers)
                .and_then(|token| self.tokens.get(token))
                .cloned()
                .ok_or(TallyError::Unauthenticated);
        }
        self.anonymous.clone().ok_or(TallyError::Unauthenticated)
    }
}

/// Extractor for the authenticated user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = TallyError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        state.identity.current_user_id(&parts.headers).map(CurrentUser)
    }
}
