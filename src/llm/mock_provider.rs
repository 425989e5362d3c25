// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Plays back scripted event sequences for either call shape, records every
//! request, and counts how many upstream streams have been released so
//! tests can check that cancellation does not leak the connection.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ApiError, Result, TallyError};
use crate::llm::provider::{DeltaStream, LlmProvider, RichEvent, RichStream, TurnRequest};

/// One step of a scripted stream
#[derive(Clone, Debug)]
pub enum MockStep {
    /// Yield a typed event (text deltas are also played on delta-only calls)
    Event(RichEvent),
    /// Fail the stream with a network error
    Error(String),
    /// Sleep before the next step
    Delay(Duration),
    /// Never produce another item
    Hang,
}

/// A scripted response for one provider call
#[derive(Clone, Debug, Default)]
pub struct MockScript {
    /// Fail the call before any stream is opened
    pub open_error: Option<String>,
    pub steps: Vec<MockStep>,
}

impl MockScript {
    /// Typed events played in order
    pub fn events(events: Vec<RichEvent>) -> Self {
        Self {
            open_error: None,
            steps: events.into_iter().map(MockStep::Event).collect(),
        }
    }

    /// Plain text chunks, then a completion with `response_id`
    pub fn text(chunks: &[&str], response_id: &str) -> Self {
        let mut events: Vec<RichEvent> = chunks
            .iter()
            .map(|c| RichEvent::TextDelta(c.to_string()))
            .collect();
        events.push(RichEvent::Completed {
            response_id: response_id.to_string(),
        });
        Self::events(events)
    }

    pub fn steps(steps: Vec<MockStep>) -> Self {
        Self {
            open_error: None,
            steps,
        }
    }

    /// A call that fails before streaming
    pub fn open_failure(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            steps: Vec::new(),
        }
    }
}

/// Which call shape a request used
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockProtocol {
    DeltaOnly,
    Rich,
}

/// A request seen by the mock
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub protocol: MockProtocol,
    pub request: TurnRequest,
}

/// A mock LLM provider for testing
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    scripts: Arc<Mutex<VecDeque<MockScript>>>,
    call_count: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock provider lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockProvider {
    /// Create a new mock provider. With no scripts queued every call answers
    /// "Mock response" and completes with id `resp_mock_<n>`.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a script for the next unscripted call
    pub fn with_script(self, script: MockScript) -> Self {
        self.push_script(script);
        self
    }

    /// Queue several scripts, played in order
    pub fn with_scripts(self, scripts: Vec<MockScript>) -> Self {
        for script in scripts {
            self.push_script(script);
        }
        self
    }

    pub fn push_script(&self, script: MockScript) {
        lock(&self.scripts).push_back(script);
    }

    /// Number of calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of opened streams that have since been dropped
    pub fn released_streams(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        lock(&self.recorded).clone()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        lock(&self.recorded).last().cloned()
    }

    fn begin_call(&self, protocol: MockProtocol, request: TurnRequest) -> Result<MockScript> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.recorded).push(RecordedCall { protocol, request });

        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| MockScript::text(&["Mock response"], &format!("resp_mock_{}", n)));

        match script.open_error {
            Some(ref message) => Err(TallyError::Api(ApiError::Network(message.clone()))),
            None => Ok(script),
        }
    }
}

/// Counts a stream as released when dropped
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_delta_only(&self, request: TurnRequest) -> Result<DeltaStream> {
        let script = self.begin_call(MockProtocol::DeltaOnly, request)?;
        let guard = ReleaseGuard(self.released.clone());

        let stream = async_stream::stream! {
            let _guard = guard;
            for step in script.steps {
                match step {
                    MockStep::Event(RichEvent::TextDelta(text)) => yield Ok(text),
                    MockStep::Event(_) => {}
                    MockStep::Error(message) => {
                        yield Err(TallyError::Api(ApiError::Network(message)));
                        return;
                    }
                    MockStep::Delay(duration) => tokio::time::sleep(duration).await,
                    MockStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn stream_rich(&self, request: TurnRequest) -> Result<RichStream> {
        let script = self.begin_call(MockProtocol::Rich, request)?;
        let guard = ReleaseGuard(self.released.clone());

        let stream = async_stream::stream! {
            let _guard = guard;
            for step in script.steps {
                match step {
                    MockStep::Event(event) => yield Ok(event),
                    MockStep::Error(message) => {
                        yield Err(TallyError::Api(ApiError::Network(message)));
                        return;
                    }
                    MockStep::Delay(duration) => tokio::time::sleep(duration).await,
                    MockStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
