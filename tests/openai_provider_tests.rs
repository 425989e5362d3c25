// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI provider against a local mock HTTP server

use futures::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tally::error::{ApiError, TallyError};
use tally::index::IndexHandle;
use tally::llm::provider::{ItemKind, LlmProvider, RichEvent, TurnRequest};
use tally::llm::providers::OpenAiProvider;
use tally::router::ToolSpec;

fn sse(payloads: &[Value]) -> String {
    let mut body = String::new();
    for payload in payloads {
        body.push_str("data: ");
        body.push_str(&payload.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(payloads: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse(payloads))
}

#[tokio::test]
async fn test_rich_stream_maps_responses_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4.1",
            "stream": true,
            "previous_response_id": "resp_prev",
            "tools": [
                {"type": "file_search", "vector_store_ids": ["vs_course"]},
                {"type": "web_search_preview", "search_context_size": "medium"},
            ],
        })))
        .respond_with(sse_response(&[
            json!({"type": "response.created", "response": {"id": "resp_new"}}),
            json!({"type": "response.output_item.added", "item": {"type": "web_search_call"}}),
            json!({"type": "response.output_text.delta", "delta": "Rates rose"}),
            json!({
                "type": "response.output_item.done",
                "item": {"type": "web_search_call", "action": {"query": "mortgage rates"}}
            }),
            json!({"type": "response.completed", "response": {"id": "resp_new"}}),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("sk-test", server.uri());
    let request = TurnRequest::new("gpt-4.1", "What are rates doing?")
        .with_tools(vec![
            ToolSpec::DocumentSearch {
                indexes: vec![IndexHandle::new("vs_course")],
            },
            ToolSpec::WebSearch,
        ])
        .with_previous_response(Some("resp_prev".into()));

    let events: Vec<RichEvent> = provider
        .stream_rich(request)
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| futures::future::ready(!matches!(e, RichEvent::Ignored(_))))
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            RichEvent::ItemAdded(ItemKind::WebSearch),
            RichEvent::TextDelta("Rates rose".into()),
            RichEvent::ItemDone {
                kind: ItemKind::WebSearch,
                queries: vec!["mortgage rates".into()],
            },
            RichEvent::Completed {
                response_id: "resp_new".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_delta_stream_uses_chat_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "o3",
            "max_completion_tokens": 2000,
            "messages": [
                {"role": "developer", "content": "formatting re-enabled"},
                {"role": "system", "content": "Be careful."},
                {"role": "user", "content": "Plan my budget"},
            ],
        })))
        .respond_with(sse_response(&[
            json!({"choices": [{"delta": {"role": "assistant"}}]}),
            json!({"choices": [{"delta": {"content": "Step "}}]}),
            json!({"choices": [{"delta": {"content": "one"}}]}),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("sk-test", format!("{}/", server.uri()));
    let request = TurnRequest::new("o3", "Plan my budget").with_instructions("Be careful.");

    let chunks: Vec<String> = provider
        .stream_delta_only(request)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec!["Step ", "one"]);
}

#[tokio::test]
async fn test_error_event_fails_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(&[
            json!({"type": "response.output_text.delta", "delta": "Partial"}),
            json!({"type": "error", "message": "upstream overloaded"}),
        ]))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("sk-test", server.uri());
    let mut stream = provider
        .stream_rich(TurnRequest::new("gpt-4.1", "hi"))
        .await
        .unwrap();

    assert_eq!(
        stream.next().await.unwrap().unwrap(),
        RichEvent::TextDelta("Partial".into())
    );
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.to_string().contains("upstream overloaded"));
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "bad key", "code": "invalid_api_key"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(json!({"error": {"message": "slow down"}})),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::with_base_url("sk-bad", server.uri());

    let rich = provider.stream_rich(TurnRequest::new("gpt-4.1", "hi")).await;
    assert!(matches!(
        rich,
        Err(TallyError::Api(ApiError::AuthenticationFailed))
    ));

    let delta = provider
        .stream_delta_only(TurnRequest::new("o3", "hi"))
        .await;
    assert!(matches!(delta, Err(TallyError::Api(ApiError::RateLimited(7)))));
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    // Nothing listens on the discard port.
    let provider = OpenAiProvider::with_base_url("sk-test", "http://127.0.0.1:9");
    let result = provider.stream_rich(TurnRequest::new("gpt-4.1", "hi")).await;
    match result {
        Err(e) => assert!(e.is_transport()),
        Ok(_) => panic!("expected a network error"),
    }
}
