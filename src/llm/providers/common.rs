// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

use crate::error::{ApiError, TallyError};

/// Default wait when a 429 carries no Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u32 = 60;

/// Splits an SSE byte stream into `data:` payloads.
///
/// Lines are cut on raw bytes so a UTF-8 sequence split across two network
/// reads is reassembled before decoding.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the payloads of every complete line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a final line that had no trailing newline
    pub(crate) fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Construct a standardized server error.
pub(crate) fn server_error(status: u16, message: impl Into<String>) -> TallyError {
    TallyError::Api(ApiError::ServerError {
        status,
        message: message.into(),
    })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Classify a non-success HTTP response.
pub(crate) fn parse_error(status: u16, headers: &HeaderMap, body: &str) -> TallyError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.code.unwrap_or_default()),
        Err(_) => (body.to_string(), String::new()),
    };

    match (status, code.as_str()) {
        (401, _) | (_, "invalid_api_key") => TallyError::Api(ApiError::AuthenticationFailed),
        (429, _) | (_, "rate_limit_exceeded") => {
            let secs = parse_retry_after_seconds(headers)
                .and_then(|s| u32::try_from(s).ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            TallyError::Api(ApiError::RateLimited(secs))
        }
        (404, _) | (_, "model_not_found") => TallyError::Api(ApiError::ModelNotFound(message)),
        _ => server_error(status, message),
    }
}
