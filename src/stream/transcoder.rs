// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Server-side stream transcoder
//!
//! Turns one provider event stream into the canonical frame sequence,
//! writes it to the response body, and accumulates the answer for
//! persistence. A turn ends in one of three ways:
//!
//! - the upstream finishes: the continuation token (if any) is written last;
//! - the upstream errors or the deadline expires: an apology is appended;
//! - the consumer disconnects or the turn is cancelled: forwarding stops and
//!   the upstream is dropped.
//!
//! In every case the text produced so far is returned in the report. The
//! body stays open as an [`OpenBody`] until the caller has settled the turn,
//! so a client never sees the end of one turn before it can start the next.

use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::llm::provider::{DeltaStream, ItemKind, RichEvent, RichStream};
use crate::stream::frame::{StreamFrame, ToolKind, ToolTimeline};
use crate::stream::wire::encode_frame;

/// Appended to the output when the upstream fails mid-turn
pub const APOLOGY: &str =
    "\n\nSorry, I encountered an error while processing your request. Please try again.";

/// How long the apology and error signal may wait on a slow consumer
const FAILURE_GRACE: Duration = Duration::from_secs(5);

/// One chunk of the response body
pub type OutputChunk = std::io::Result<Vec<u8>>;

/// Receiving half of the response body
pub type OutputStream = ReceiverStream<OutputChunk>;

/// Writing half of the response body.
///
/// Once the consumer is gone or the sink is finalized every write is a
/// no-op returning false; closing or failing twice does nothing.
#[derive(Debug)]
pub struct OutputSink {
    tx: Option<mpsc::Sender<OutputChunk>>,
    bytes_written: usize,
}

impl OutputSink {
    /// Create a bounded body channel. Writes wait while `capacity` chunks
    /// are unread.
    pub fn channel(capacity: usize) -> (OutputSink, OutputStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            OutputSink {
                tx: Some(tx),
                bytes_written: 0,
            },
            ReceiverStream::new(rx),
        )
    }

    /// Write bytes. Returns false if nothing could be written.
    pub async fn write(&mut self, data: Vec<u8>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let len = data.len();
        if tx.send(Ok(data)).await.is_err() {
            tracing::warn!(
                bytes = self.bytes_written,
                "Output consumer disconnected; dropping further writes"
            );
            self.tx = None;
            return false;
        }
        self.bytes_written += len;
        true
    }

    /// End the body with an error signal
    pub async fn fail(&mut self, message: &str) {
        if let Some(tx) = self.tx.take() {
            let err = std::io::Error::other(message.to_string());
            if tx.send(Err(err)).await.is_err() {
                tracing::warn!("Output consumer gone before error signal");
            }
        }
    }

    /// End the body normally
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            tracing::debug!(bytes = self.bytes_written, "Output stream closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Resolves when the consumer drops the receiving half. Never resolves
    /// once the sink is finalized.
    async fn disconnected(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => futures::future::pending().await,
        }
    }
}

/// An opened provider stream of either protocol shape
pub enum Upstream {
    DeltaOnly(DeltaStream),
    Rich(RichStream),
}

impl Upstream {
    fn into_events(self) -> RichStream {
        match self {
            Upstream::DeltaOnly(deltas) => {
                Box::pin(deltas.map(|chunk| chunk.map(RichEvent::TextDelta)))
            }
            Upstream::Rich(events) => events,
        }
    }
}

/// Response body held open until the turn is settled
#[derive(Debug)]
pub struct OpenBody {
    sink: OutputSink,
    failure: Option<String>,
}

impl OpenBody {
    /// End the body: normally after a completed or cancelled turn, with an
    /// error signal after a failed one.
    pub async fn finish(mut self) {
        match self.failure.take() {
            Some(reason) => {
                if tokio::time::timeout(FAILURE_GRACE, self.sink.fail(&reason))
                    .await
                    .is_err()
                {
                    tracing::warn!("Consumer too slow for the error signal; closing");
                    self.sink.close();
                }
            }
            None => self.sink.close(),
        }
    }
}

/// How a transcoded turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed,
    Failed { reason: String },
    Cancelled { reason: String },
}

/// Everything a turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    /// Answer text, including the apology on failure
    pub text: String,
    pub timeline: ToolTimeline,
    /// Continuation token, only present on a completed turn
    pub continuation: Option<String>,
    pub outcome: TranscodeOutcome,
}

impl TranscodeReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == TranscodeOutcome::Completed
    }
}

/// Maps provider events to frames and keeps the tool timeline.
///
/// The completion event is held back so the continuation token can be
/// emitted after everything else.
#[derive(Debug, Default)]
pub struct EventMapper {
    timeline: ToolTimeline,
    completion: Option<String>,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames for one provider event
    pub fn map(&mut self, event: RichEvent) -> Vec<StreamFrame> {
        match event {
            RichEvent::TextDelta(text) if text.is_empty() => Vec::new(),
            RichEvent::TextDelta(text) => vec![StreamFrame::ContentDelta(text)],
            RichEvent::ItemAdded(item) => {
                let Some(kind) = tool_kind(&item) else {
                    return Vec::new();
                };
                if self.timeline.start(kind, Utc::now()) {
                    vec![StreamFrame::tool_started(kind)]
                } else {
                    tracing::debug!(tool = %kind, "Ignoring duplicate tool start");
                    Vec::new()
                }
            }
            RichEvent::ItemDone { kind: item, queries } => {
                let Some(kind) = tool_kind(&item) else {
                    return Vec::new();
                };
                let summary = completion_summary(kind, &queries);
                let mut frames = Vec::new();

                if !self.timeline.is_active(kind) {
                    if self.timeline.records().iter().any(|r| r.kind == kind) {
                        tracing::debug!(tool = %kind, "Ignoring repeated tool completion");
                        return frames;
                    }
                    // Completion without a start: open the record first.
                    self.timeline.start(kind, Utc::now());
                    frames.push(StreamFrame::tool_started(kind));
                }

                self.timeline.complete(kind, Some(&summary));
                frames.push(StreamFrame::tool_completed(kind, summary));
                frames
            }
            RichEvent::Completed { response_id } => {
                self.completion = Some(response_id);
                Vec::new()
            }
            RichEvent::Ignored(kind) => {
                if is_routine_event(&kind) {
                    tracing::debug!(event = %kind, "Ignoring provider event");
                } else {
                    tracing::warn!(event = %kind, "Ignoring unknown provider event");
                }
                Vec::new()
            }
        }
    }

    pub fn timeline(&self) -> &ToolTimeline {
        &self.timeline
    }

    /// The continuation token, once the completion event was seen
    pub fn take_completion(&mut self) -> Option<String> {
        self.completion.take()
    }
}

fn tool_kind(item: &ItemKind) -> Option<ToolKind> {
    match item {
        ItemKind::WebSearch => Some(ToolKind::WebSearch),
        ItemKind::FileSearch => Some(ToolKind::DocumentSearch),
        ItemKind::CodeInterpreter => Some(ToolKind::CodeExecution),
        ItemKind::Other(_) => None,
    }
}

/// Lifecycle events the provider sends on every turn that carry nothing
/// the stream needs
fn is_routine_event(kind: &str) -> bool {
    matches!(
        kind,
        "response.created"
            | "response.in_progress"
            | "response.queued"
            | "response.output_text.done"
            | "response.output_text.annotation.added"
            | "response.content_part.added"
            | "response.content_part.done"
    ) || ROUTINE_EVENT_PREFIXES
        .iter()
        .any(|prefix| kind.starts_with(prefix))
}

const ROUTINE_EVENT_PREFIXES: [&str; 4] = [
    "response.reasoning",
    "response.web_search_call.",
    "response.file_search_call.",
    "response.code_interpreter_call",
];

fn completion_summary(kind: ToolKind, queries: &[String]) -> String {
    let queries: Vec<&str> = queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .collect();
    match kind {
        ToolKind::WebSearch if !queries.is_empty() => queries.join(", "),
        _ => kind.placeholder_summary().to_string(),
    }
}

enum Step {
    Next(Option<crate::error::Result<RichEvent>>),
    Cancelled(&'static str),
    DeadlineExpired,
}

enum WriteResult {
    Written,
    Disconnected,
    Cancelled,
    DeadlineExpired,
}

/// Drives one turn's upstream into an [`OutputSink`]
pub struct Transcoder {
    sink: OutputSink,
    cancel: CancellationToken,
    deadline: Instant,
    mapper: EventMapper,
    text: String,
}

impl Transcoder {
    pub fn new(sink: OutputSink, cancel: CancellationToken, deadline: Instant) -> Self {
        Self {
            sink,
            cancel,
            deadline,
            mapper: EventMapper::new(),
            text: String::new(),
        }
    }

    /// Transcode until the upstream ends, fails, or the turn is cancelled.
    /// The upstream is dropped before this returns.
    pub async fn run(mut self, upstream: Upstream) -> (TranscodeReport, OpenBody) {
        let outcome = self.pump(upstream.into_events()).await;
        self.finish(outcome)
    }

    /// Report a provider call that failed before any stream was opened.
    pub async fn fail(mut self, reason: impl Into<String>) -> (TranscodeReport, OpenBody) {
        let outcome = self.fail_turn(reason.into()).await;
        self.finish(outcome)
    }

    /// Report a turn cancelled before any stream was opened.
    pub fn abort(mut self, reason: &str) -> (TranscodeReport, OpenBody) {
        let outcome = self.cancelled(reason);
        self.finish(outcome)
    }

    async fn pump(&mut self, mut events: RichStream) -> TranscodeOutcome {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled("turn cancelled"),
                _ = self.sink.disconnected() => Step::Cancelled("client disconnected"),
                next = tokio::time::timeout_at(self.deadline, events.next()) => match next {
                    Ok(item) => Step::Next(item),
                    Err(_) => Step::DeadlineExpired,
                },
            };

            let event = match step {
                Step::Next(None) => break,
                Step::Next(Some(Ok(event))) => event,
                Step::Next(Some(Err(e))) => {
                    drop(events);
                    return self.fail_turn(e.to_string()).await;
                }
                Step::DeadlineExpired => {
                    drop(events);
                    return self.fail_turn("turn deadline exceeded".to_string()).await;
                }
                Step::Cancelled(reason) => return self.cancelled(reason),
            };

            for frame in self.mapper.map(event) {
                match self.emit(frame).await {
                    WriteResult::Written => {}
                    WriteResult::Disconnected => return self.cancelled("client disconnected"),
                    WriteResult::Cancelled => return self.cancelled("turn cancelled"),
                    WriteResult::DeadlineExpired => {
                        drop(events);
                        return self.fail_turn("turn deadline exceeded".to_string()).await;
                    }
                }
            }
        }

        drop(events);
        if let Some(token) = self.mapper.completion.clone() {
            // The provider finished; a consumer that left at this point does
            // not change the outcome.
            self.emit(StreamFrame::continuation(token)).await;
        }
        TranscodeOutcome::Completed
    }

    async fn emit(&mut self, frame: StreamFrame) -> WriteResult {
        if let StreamFrame::ContentDelta(ref text) = frame {
            self.text.push_str(text);
        } else {
            tracing::debug!(?frame, "Forwarding control frame");
        }

        let bytes = encode_frame(&frame).into_bytes();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => WriteResult::Cancelled,
            written = tokio::time::timeout_at(self.deadline, self.sink.write(bytes)) => match written {
                Ok(true) => WriteResult::Written,
                Ok(false) => WriteResult::Disconnected,
                Err(_) => WriteResult::DeadlineExpired,
            },
        }
    }

    async fn fail_turn(&mut self, reason: String) -> TranscodeOutcome {
        tracing::warn!(reason = %reason, "Upstream failed mid-turn");
        self.text.push_str(APOLOGY);

        let apology = self.sink.write(APOLOGY.as_bytes().to_vec());
        if tokio::time::timeout(FAILURE_GRACE, apology).await.is_err() {
            tracing::warn!("Consumer too slow for the apology; closing");
            self.sink.close();
        }

        TranscodeOutcome::Failed { reason }
    }

    fn cancelled(&mut self, reason: &str) -> TranscodeOutcome {
        tracing::info!(reason, "Turn stopped before completion");
        self.sink.close();
        TranscodeOutcome::Cancelled {
            reason: reason.to_string(),
        }
    }

    fn finish(mut self, outcome: TranscodeOutcome) -> (TranscodeReport, OpenBody) {
        let (continuation, failure) = match &outcome {
            TranscodeOutcome::Completed => (self.mapper.take_completion(), None),
            TranscodeOutcome::Failed { reason } => (None, Some(reason.clone())),
            TranscodeOutcome::Cancelled { .. } => (None, None),
        };
        let report = TranscodeReport {
            text: self.text,
            timeline: self.mapper.timeline,
            continuation,
            outcome,
        };
        let body = OpenBody {
            sink: self.sink,
            failure,
        };
        (report, body)
    }
}
