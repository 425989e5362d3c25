// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP client for a running Tally server
//!
//! [`ChatClient::send`] streams one turn through a [`StreamDecoder`],
//! handing every decoded frame to a callback as it arrives, and records
//! the continuation token in a client-side [`ContinuationStore`].

use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::continuation::{ContinuationStore, InMemoryContinuationStore};
use crate::chat::request::{ChatRequest, CONVERSATION_ID_HEADER, MODEL_HEADER};
use crate::error::{ApiError, Result, TallyError};
use crate::server::routes::{AttachFileRequest, AttachFileResponse};
use crate::server::ErrorBody;
use crate::store::{ConversationSummary, Turn};
use crate::stream::decoder::StreamDecoder;
use crate::stream::frame::{StreamFrame, ToolTimeline};

/// Result of one streamed turn
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub conversation_id: Uuid,
    pub model: Option<String>,
    pub content: String,
    pub timeline: ToolTimeline,
    pub continuation: Option<String>,
    /// Set when the body ended with an error instead of a normal close
    pub interrupted: Option<String>,
}

impl ChatReply {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    /// `Err(Stream)` when the body ended with an error signal
    pub fn ensure_complete(&self) -> Result<()> {
        match &self.interrupted {
            Some(reason) => Err(TallyError::Stream(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Client for the Tally HTTP API
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    continuations: Arc<dyn ContinuationStore>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            continuations: Arc::new(InMemoryContinuationStore::new()),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_continuations(mut self, store: Arc<dyn ContinuationStore>) -> Self {
        self.continuations = store;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Last continuation token seen for a conversation
    pub async fn continuation(&self, conversation_id: Uuid) -> Result<Option<String>> {
        self.continuations.get(conversation_id).await
    }

    /// Send one turn. `on_frame` sees every frame in stream order.
    pub async fn send<F>(&self, request: &ChatRequest, mut on_frame: F) -> Result<ChatReply>
    where
        F: FnMut(&StreamFrame),
    {
        let response = self
            .authorized(self.http.post(self.url("/api/chat")))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let conversation_id = response
            .headers()
            .get(CONVERSATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                ApiError::InvalidResponse(format!("missing {} header", CONVERSATION_ID_HEADER))
            })?;
        let model = response
            .headers()
            .get(MODEL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut decoder = StreamDecoder::new();
        let mut interrupted = None;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(&bytes) {
                        self.observe(conversation_id, &frame).await;
                        on_frame(&frame);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chat stream ended with an error");
                    interrupted = Some(e.to_string());
                    break;
                }
            }
        }
        for frame in decoder.finish() {
            self.observe(conversation_id, &frame).await;
            on_frame(&frame);
        }

        let turn = decoder.into_turn();
        Ok(ChatReply {
            conversation_id,
            model,
            content: turn.content,
            timeline: turn.timeline,
            continuation: turn.continuation,
            interrupted,
        })
    }

    /// The caller's conversations, most recent first
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .authorized(self.http.get(self.url("/api/conversations")))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Turns of one conversation
    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Turn>> {
        let path = format!("/api/conversations/{}/messages", conversation_id);
        let response = self.authorized(self.http.get(self.url(&path))).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<()> {
        let path = format!("/api/conversations/{}", conversation_id);
        let response = self
            .authorized(self.http.delete(self.url(&path)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Attach an uploaded provider file to the caller's document index
    pub async fn attach_file(&self, file_id: &str) -> Result<AttachFileResponse> {
        let response = self
            .authorized(self.http.post(self.url("/api/files")))
            .json(&AttachFileRequest {
                file_id: file_id.to_string(),
            })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Whether the server answers its health check
    pub async fn health(&self) -> Result<bool> {
        let response = self.http.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    async fn observe(&self, conversation_id: Uuid, frame: &StreamFrame) {
        if let StreamFrame::ContinuationToken(token) = frame {
            if let Err(e) = self.continuations.set(conversation_id, token).await {
                tracing::warn!(error = %e, "failed to record continuation token");
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Map a non-success response to the error the server reported
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(error_for_status(status, message))
}

fn error_for_status(status: StatusCode, message: String) -> TallyError {
    match status {
        StatusCode::UNAUTHORIZED => TallyError::Unauthenticated,
        StatusCode::BAD_REQUEST => TallyError::InvalidInput(message),
        StatusCode::NOT_FOUND => TallyError::NotFound(message),
        StatusCode::CONFLICT => TallyError::TurnInProgress(message),
        _ => TallyError::Api(ApiError::ServerError {
            status: status.as_u16(),
            message,
        }),
    }
}
