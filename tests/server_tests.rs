// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP server and client against each other over a real socket

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use tally::chat::{
    ChatRequest, ControllerOptions, ConversationController, CONVERSATION_ID_HEADER, MODEL_HEADER,
};
use tally::client::ChatClient;
use tally::config::Settings;
use tally::error::TallyError;
use tally::index::LocalIndexRegistry;
use tally::llm::mock_provider::{MockProvider, MockScript, MockStep};
use tally::llm::provider::{ItemKind, RichEvent};
use tally::router::Router;
use tally::server::{self, AppState, BearerTokenIdentity};
use tally::store::{Completion, Role, SqliteStore};
use tally::stream::{StreamFrame, ToolKind, ToolState};
use uuid::Uuid;

struct TestServer {
    base_url: String,
    provider: MockProvider,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(provider: MockProvider) -> Self {
        let settings = Settings::default();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let controller = ConversationController::new(
            Arc::new(provider.clone()),
            store.clone(),
            store,
            Arc::new(LocalIndexRegistry::new(None)),
            Router::new(&settings.models, &settings.router),
            ControllerOptions::default(),
        );
        let mut tokens = HashMap::new();
        tokens.insert("tok-alice".to_string(), "alice".to_string());
        tokens.insert("tok-bob".to_string(), "bob".to_string());
        let state = AppState::new(
            Arc::new(controller),
            Arc::new(BearerTokenIdentity::new(tokens)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, state, async {
            let _ = rx.await;
        }));

        Self {
            base_url: format!("http://{}", addr),
            provider,
            shutdown: Some(tx),
        }
    }

    fn client(&self, token: &str) -> ChatClient {
        ChatClient::new(&self.base_url).with_token(Some(token.to_string()))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_streamed_turn_with_tool_activity() {
    let server = TestServer::start(MockProvider::new().with_script(MockScript::events(vec![
        RichEvent::ItemAdded(ItemKind::WebSearch),
        RichEvent::TextDelta("Rates ".into()),
        RichEvent::ItemDone {
            kind: ItemKind::WebSearch,
            queries: vec!["mortgage rates today".into()],
        },
        RichEvent::TextDelta("rose.".into()),
        RichEvent::Completed {
            response_id: "resp_1".into(),
        },
    ])))
    .await;
    let client = server.client("tok-alice");

    let mut frames = Vec::new();
    let reply = client
        .send(&ChatRequest::new("What are current rates?"), |f| {
            frames.push(f.clone())
        })
        .await
        .unwrap();

    assert!(reply.is_complete());
    assert_eq!(reply.content, "Rates rose.");
    assert_eq!(reply.model.as_deref(), Some("gpt-4.1"));
    assert_eq!(reply.continuation.as_deref(), Some("resp_1"));
    assert_eq!(
        client.continuation(reply.conversation_id).await.unwrap().as_deref(),
        Some("resp_1")
    );

    let records = reply.timeline.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ToolKind::WebSearch);
    assert_eq!(records[0].state, ToolState::Completed);
    assert_eq!(records[0].summary.as_deref(), Some("mortgage rates today"));

    assert!(matches!(
        frames.first(),
        Some(StreamFrame::ToolLifecycle {
            kind: ToolKind::WebSearch,
            state: ToolState::Active,
            ..
        })
    ));
    assert!(matches!(
        frames.last(),
        Some(StreamFrame::ContinuationToken(t)) if t == "resp_1"
    ));

    // The body ends only after the turn is stored.
    let turns = client.messages(reply.conversation_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Rates rose.");
    assert_eq!(turns[1].completion, Completion::Complete);
}

#[tokio::test]
async fn test_response_headers() {
    let server =
        TestServer::start(MockProvider::new().with_script(MockScript::text(&["hi"], "resp_1")))
            .await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/chat", server.base_url))
        .bearer_auth("tok-alice")
        .json(&ChatRequest::new("hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/plain; charset=utf-8");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers[MODEL_HEADER], "gpt-4.1");
    let id = headers[CONVERSATION_ID_HEADER].to_str().unwrap();
    assert!(Uuid::parse_str(id).is_ok());

    let body = response.text().await.unwrap();
    assert!(body.starts_with("hi"));
}

#[tokio::test]
async fn test_continuation_is_sent_on_the_next_turn() {
    let server = TestServer::start(MockProvider::new().with_scripts(vec![
        MockScript::text(&["first"], "resp_1"),
        MockScript::text(&["second"], "resp_2"),
    ]))
    .await;
    let client = server.client("tok-alice");

    let first = client
        .send(&ChatRequest::new("one"), |_| {})
        .await
        .unwrap();
    let second = client
        .send(
            &ChatRequest::new("two").with_conversation(Some(first.conversation_id)),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.content, "second");

    let calls = server.provider.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].request.previous_response_id, None);
    assert_eq!(
        calls[1].request.previous_response_id.as_deref(),
        Some("resp_1")
    );
}

#[tokio::test]
async fn test_authentication_is_required() {
    let server = TestServer::start(MockProvider::new()).await;

    let anonymous = ChatClient::new(&server.base_url);
    let result = anonymous.send(&ChatRequest::new("hello"), |_| {}).await;
    assert!(matches!(result, Err(TallyError::Unauthenticated)));

    let forged = server.client("tok-mallory");
    assert!(matches!(
        forged.list_conversations().await,
        Err(TallyError::Unauthenticated)
    ));

    // Health needs no credentials.
    assert!(anonymous.health().await.unwrap());
    assert_eq!(server.provider.call_count(), 0);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let server = TestServer::start(MockProvider::new()).await;
    let client = server.client("tok-alice");

    let result = client.send(&ChatRequest::new("   "), |_| {}).await;
    assert!(matches!(result, Err(TallyError::InvalidInput(_))));
    assert!(client.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_turn_while_streaming_conflicts() {
    let server = TestServer::start(MockProvider::new().with_script(MockScript::steps(vec![
        MockStep::Event(RichEvent::TextDelta("thinking".into())),
        MockStep::Hang,
    ])))
    .await;
    let client = server.client("tok-alice");

    let mut first = reqwest::Client::new()
        .post(format!("{}/api/chat", server.base_url))
        .bearer_auth("tok-alice")
        .json(&ChatRequest::new("long question"))
        .send()
        .await
        .unwrap();
    let id = Uuid::parse_str(first.headers()[CONVERSATION_ID_HEADER].to_str().unwrap()).unwrap();
    let chunk = first.chunk().await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"thinking");

    let second = client
        .send(&ChatRequest::new("impatient").with_conversation(Some(id)), |_| {})
        .await;
    assert!(matches!(second, Err(TallyError::TurnInProgress(_))));

    // Deleting cancels the open turn and ends its body.
    client.delete_conversation(id).await.unwrap();
    while first.chunk().await.unwrap_or(None).is_some() {}
    assert!(client.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conversations_are_private() {
    let server = TestServer::start(
        MockProvider::new().with_script(MockScript::text(&["secret"], "resp_1")),
    )
    .await;
    let alice = server.client("tok-alice");
    let bob = server.client("tok-bob");

    let reply = alice
        .send(&ChatRequest::new("my salary is 90k"), |_| {})
        .await
        .unwrap();
    let id = reply.conversation_id;

    assert_eq!(alice.list_conversations().await.unwrap().len(), 1);
    assert!(bob.list_conversations().await.unwrap().is_empty());
    assert!(matches!(bob.messages(id).await, Err(TallyError::NotFound(_))));
    assert!(matches!(
        bob.delete_conversation(id).await,
        Err(TallyError::NotFound(_))
    ));
    let hijack = bob
        .send(&ChatRequest::new("and mine?").with_conversation(Some(id)), |_| {})
        .await;
    assert!(matches!(hijack, Err(TallyError::NotFound(_))));

    alice.delete_conversation(id).await.unwrap();
    assert!(alice.list_conversations().await.unwrap().is_empty());
    assert!(matches!(alice.messages(id).await, Err(TallyError::NotFound(_))));
}

#[tokio::test]
async fn test_attach_file_reaches_document_search() {
    let server = TestServer::start(
        MockProvider::new().with_script(MockScript::text(&["Per your notes"], "resp_1")),
    )
    .await;
    let client = server.client("tok-alice");

    let attached = client.attach_file("file-abc").await.unwrap();
    assert_eq!(attached.file_id, "file-abc");
    assert!(!attached.index_id.is_empty());

    let reply = client
        .send(
            &ChatRequest::new("Summarize my notes").with_files(vec!["file-abc".into()]),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(reply.content, "Per your notes");

    let call = server.provider.last_call().unwrap();
    assert!(call
        .request
        .tools
        .iter()
        .any(|t| t.kind() == ToolKind::DocumentSearch));

    let turns = client.messages(reply.conversation_id).await.unwrap();
    assert_eq!(turns[0].files, vec!["file-abc".to_string()]);
}
