// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI API provider implementation
//!
//! The delta-only shape uses `/chat/completions`; the rich shape uses
//! `/responses`, whose typed events report hosted tool items and whose
//! response id continues the conversation server-side.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, Result, TallyError};
use crate::llm::provider::{
    DeltaStream, ItemKind, LlmProvider, RichEvent, RichStream, TurnRequest,
};
use crate::llm::providers::common::{parse_error, SseBuffer};
use crate::router::ToolSpec;

/// Default API root
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Developer message that turns markdown back on for reasoning models
const FORMATTING_DEVELOPER_MESSAGE: &str = "formatting re-enabled";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENAI_API_URL)
    }

    /// Create with a custom base URL (e.g. a proxy or a test server)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request body for the delta-only protocol
    fn chat_completions_body(&self, request: &TurnRequest) -> Value {
        let mut messages = vec![json!({
            "role": "developer",
            "content": FORMATTING_DEVELOPER_MESSAGE,
        })];
        if let Some(ref instructions) = request.instructions {
            messages.push(json!({ "role": "system", "content": instructions }));
        }
        messages.push(json!({ "role": "user", "content": request.input }));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_completion_tokens": request.max_output_tokens,
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    /// Request body for the rich-event protocol
    fn responses_body(&self, request: &TurnRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "input": [{ "role": "user", "content": request.input }],
            "max_output_tokens": request.max_output_tokens,
            "stream": true,
        });
        if let Some(ref instructions) = request.instructions {
            body["instructions"] = json!(instructions);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
        }
        if let Some(ref previous) = request.previous_response_id {
            body["previous_response_id"] = json!(previous);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn post_stream(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TallyError::Api(ApiError::Network(e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &headers, &body));
        }

        Ok(response)
    }
}

fn convert_tool(tool: &ToolSpec) -> Value {
    match tool {
        ToolSpec::DocumentSearch { indexes } => json!({
            "type": "file_search",
            "vector_store_ids": indexes.iter().map(|i| i.as_str()).collect::<Vec<_>>(),
        }),
        ToolSpec::WebSearch => json!({
            "type": "web_search_preview",
            "search_context_size": "medium",
        }),
        ToolSpec::CodeExecution => json!({
            "type": "code_interpreter",
            "container": { "type": "auto" },
        }),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_delta_only(&self, request: TurnRequest) -> Result<DeltaStream> {
        if !request.tools.is_empty() || request.previous_response_id.is_some() {
            tracing::debug!(
                model = %request.model,
                "Delta-only protocol ignores tools and continuation"
            );
        }

        let body = self.chat_completions_body(&request);
        let response = self.post_stream("chat/completions", &body).await?;
        let stream = response.bytes_stream();

        let deltas = async_stream::try_stream! {
            let mut sse = SseBuffer::new();
            for await chunk in stream {
                let chunk = chunk.map_err(|e| TallyError::Api(ApiError::Network(e.to_string())))?;
                for data in sse.push(&chunk) {
                    if let Some(text) = parse_delta_chunk(&data)? {
                        yield text;
                    }
                }
            }
            if let Some(data) = sse.finish() {
                if let Some(text) = parse_delta_chunk(&data)? {
                    yield text;
                }
            }
        };

        Ok(Box::pin(deltas))
    }

    async fn stream_rich(&self, request: TurnRequest) -> Result<RichStream> {
        let body = self.responses_body(&request);
        let response = self.post_stream("responses", &body).await?;
        let stream = response.bytes_stream();

        let events = async_stream::try_stream! {
            let mut sse = SseBuffer::new();
            for await chunk in stream {
                let chunk = chunk.map_err(|e| TallyError::Api(ApiError::Network(e.to_string())))?;
                for data in sse.push(&chunk) {
                    if let Some(event) = parse_rich_event(&data)? {
                        yield event;
                    }
                }
            }
            if let Some(data) = sse.finish() {
                if let Some(event) = parse_rich_event(&data)? {
                    yield event;
                }
            }
        };

        Ok(Box::pin(events))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Text carried by one chat-completions SSE payload
pub(crate) fn parse_delta_chunk(data: &str) -> Result<Option<String>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable chat chunk");
            return Ok(None);
        }
    };
    if let Some(error) = chunk.error {
        return Err(TallyError::Api(ApiError::StreamError(
            error.message.unwrap_or_else(|| "stream error".to_string()),
        )));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty()))
}

#[derive(Debug, Deserialize)]
struct ResponsesEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    response: Option<ResponseRef>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    action: Option<SearchAction>,
}

#[derive(Debug, Deserialize)]
struct SearchAction {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

/// Map one responses-API SSE payload to a [`RichEvent`].
///
/// `error` and `response.failed` events become stream errors. Unknown
/// event types, and payloads that do not parse, map to `Ignored`.
pub(crate) fn parse_rich_event(data: &str) -> Result<Option<RichEvent>> {
    if data == "[DONE]" {
        return Ok(None);
    }

    let event: ResponsesEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable responses event");
            return Ok(Some(RichEvent::Ignored("unparseable".to_string())));
        }
    };

    let mapped = match event.kind.as_str() {
        "response.output_text.delta" => match event.delta {
            Some(Value::String(text)) if !text.is_empty() => RichEvent::TextDelta(text),
            _ => return Ok(None),
        },
        "response.output_item.added" => match event.item {
            Some(item) => RichEvent::ItemAdded(ItemKind::from_type(&item.item_type)),
            None => RichEvent::Ignored(event.kind),
        },
        "response.output_item.done" => match event.item {
            Some(item) => {
                let mut queries = item.queries;
                if queries.is_empty() {
                    if let Some(query) = item.action.and_then(|a| a.query) {
                        queries.push(query);
                    }
                }
                RichEvent::ItemDone {
                    kind: ItemKind::from_type(&item.item_type),
                    queries,
                }
            }
            None => RichEvent::Ignored(event.kind),
        },
        "response.completed" => match event.response {
            Some(response) if !response.id.is_empty() => RichEvent::Completed {
                response_id: response.id,
            },
            _ => {
                return Err(TallyError::Api(ApiError::InvalidResponse(
                    "response.completed without an id".to_string(),
                )))
            }
        },
        "error" => {
            return Err(TallyError::Api(ApiError::StreamError(
                event.message.unwrap_or_else(|| "stream error".to_string()),
            )))
        }
        "response.failed" => {
            let message = event
                .response
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "response failed".to_string());
            return Err(TallyError::Api(ApiError::StreamError(message)));
        }
        _ => RichEvent::Ignored(event.kind),
    };

    Ok(Some(mapped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexHandle;

    #[test]
    fn test_parse_text_delta() {
        let event = parse_rich_event(r#"{"type":"response.output_text.delta","delta":"Hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, RichEvent::TextDelta("Hi".to_string()));
    }

    #[test]
    fn test_parse_web_search_items() {
        let added = parse_rich_event(
            r#"{"type":"response.output_item.added","item":{"type":"web_search_call","id":"ws_1"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(added, RichEvent::ItemAdded(ItemKind::WebSearch));

        let done = parse_rich_event(
            r#"{"type":"response.output_item.done","item":{"type":"web_search_call","queries":["mortgage rates","fed"]}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            done,
            RichEvent::ItemDone {
                kind: ItemKind::WebSearch,
                queries: vec!["mortgage rates".to_string(), "fed".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_web_search_action_query() {
        let done = parse_rich_event(
            r#"{"type":"response.output_item.done","item":{"type":"web_search_call","action":{"type":"search","query":"cd rates"}}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            done,
            RichEvent::ItemDone {
                kind: ItemKind::WebSearch,
                queries: vec!["cd rates".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_completed() {
        let event = parse_rich_event(
            r#"{"type":"response.completed","response":{"id":"resp_1","status":"completed"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            RichEvent::Completed {
                response_id: "resp_1".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let event = parse_rich_event(r#"{"type":"response.reasoning.delta","delta":{"x":1}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(event, RichEvent::Ignored(_)));

        let message_item = parse_rich_event(
            r#"{"type":"response.output_item.added","item":{"type":"message"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            message_item,
            RichEvent::ItemAdded(ItemKind::Other("message".to_string()))
        );
    }

    #[test]
    fn test_error_events_fail_the_stream() {
        assert!(parse_rich_event(r#"{"type":"error","message":"boom"}"#).is_err());
        let failed = parse_rich_event(
            r#"{"type":"response.failed","response":{"id":"r","error":{"message":"overloaded"}}}"#,
        )
        .unwrap_err();
        assert!(failed.to_string().contains("overloaded"));
    }

    #[test]
    fn test_parse_delta_chunk() {
        let text = parse_delta_chunk(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#).unwrap();
        assert_eq!(text.as_deref(), Some("Hello"));
        assert!(parse_delta_chunk("[DONE]").unwrap().is_none());
        assert!(parse_delta_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap()
            .is_none());
        assert!(parse_delta_chunk(r#"{"error":{"message":"bad"}}"#).is_err());
    }

    #[test]
    fn test_responses_body() {
        let provider = OpenAiProvider::new("sk-test");
        let request = TurnRequest::new("gpt-4.1", "hi")
            .with_instructions("be brief")
            .with_previous_response(Some("resp_0".to_string()))
            .with_tools(vec![
                ToolSpec::DocumentSearch {
                    indexes: vec![IndexHandle::new("vs_1")],
                },
                ToolSpec::WebSearch,
                ToolSpec::CodeExecution,
            ]);
        let body = provider.responses_body(&request);

        assert_eq!(body["previous_response_id"], "resp_0");
        assert_eq!(body["instructions"], "be brief");
        assert_eq!(body["tools"][0]["type"], "file_search");
        assert_eq!(body["tools"][0]["vector_store_ids"][0], "vs_1");
        assert_eq!(body["tools"][1]["type"], "web_search_preview");
        assert_eq!(body["tools"][2]["container"]["type"], "auto");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_chat_completions_body() {
        let provider = OpenAiProvider::with_base_url("sk-test", "http://localhost:9/v1/");
        assert_eq!(provider.base_url(), "http://localhost:9/v1");

        let request = TurnRequest::new("o3", "plan my retirement").with_instructions("system");
        let body = provider.chat_completions_body(&request);
        assert_eq!(body["messages"][0]["role"], "developer");
        assert_eq!(body["messages"][1]["content"], "system");
        assert_eq!(body["messages"][2]["content"], "plan my retirement");
        assert_eq!(body["max_completion_tokens"], 2000);
        assert!(body.get("temperature").is_none());
    }
}
