// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP handlers

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::request::{ChatRequest, CONVERSATION_ID_HEADER, MODEL_HEADER};
use crate::chat::TurnSubmission;
use crate::error::{Result, TallyError};
use crate::server::identity::CurrentUser;
use crate::server::AppState;
use crate::store::{ConversationSummary, Turn};

/// `POST /api/files` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachFileRequest {
    #[serde(alias = "fileId")]
    pub file_id: String,
}

/// `POST /api/files` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachFileResponse {
    pub file_id: String,
    pub index_id: String,
}

/// `POST /api/chat`: run one turn and stream its marker-multiplexed body
pub async fn chat(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    let handle = state
        .controller
        .submit(TurnSubmission::from_request(user_id, request))
        .await?;

    // The settlement handle is dropped: the turn finishes on its own task.
    let mut response = Response::new(Body::from_stream(handle.body));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&handle.conversation_id.to_string()) {
        headers.insert(HeaderName::from_static(CONVERSATION_ID_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&handle.route.model) {
        headers.insert(HeaderName::from_static(MODEL_HEADER), value);
    }
    Ok(response)
}

/// `GET /api/conversations`
pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.controller.list_conversations(&user_id).await?))
}

/// `GET /api/conversations/:id/messages`
pub async fn conversation_messages(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Turn>>> {
    Ok(Json(state.controller.turns(id, &user_id).await?))
}

/// `DELETE /api/conversations/:id`
pub async fn delete_conversation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.controller.delete_conversation(id, &user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TallyError::NotFound(format!("conversation {}", id)))
    }
}

/// `POST /api/files`: attach an uploaded provider file to the caller's index
pub async fn attach_file(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<AttachFileRequest>,
) -> Result<Json<AttachFileResponse>> {
    let handle = state
        .controller
        .attach_file(&user_id, &request.file_id)
        .await?;
    Ok(Json(AttachFileResponse {
        file_id: request.file_id,
        index_id: handle.to_string(),
    }))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    "OK"
}
