// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP mapping of [`TallyError`]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::TallyError;

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl TallyError {
    /// Status code for an error surfaced over HTTP
    pub fn status_code(&self) -> StatusCode {
        match self {
            TallyError::Unauthenticated => StatusCode::UNAUTHORIZED,
            TallyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TallyError::NotFound(_) => StatusCode::NOT_FOUND,
            TallyError::TurnInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TallyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
