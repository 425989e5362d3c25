// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Tally
//!
//! This module defines all error types used throughout the service and client.

use thiserror::Error;

/// Main error type for Tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persistence layer errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No identity could be established for the caller
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Requested entity does not exist (or is not owned by the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A turn is already sending or streaming for this conversation
    #[error("A turn is already in progress for conversation {0}")]
    TurnInProgress(String),

    /// Marker stream errors surfaced to a reader
    #[error("Stream error: {0}")]
    Stream(String),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl From<rusqlite::Error> for TallyError {
    fn from(err: rusqlite::Error) -> Self {
        TallyError::Storage(err.to_string())
    }
}

impl TallyError {
    /// Whether this error came from the upstream provider connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, TallyError::Api(_) | TallyError::Http(_))
    }
}
