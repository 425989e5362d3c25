// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation controller
//!
//! Drives one turn per submission:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Settled
//!                             \-> Failed
//! ```
//!
//! The user turn is persisted before the provider is called. The provider
//! stream runs on its own task; the caller gets the response body right
//! away and may drop the handle without affecting settlement. At most one
//! turn per conversation is in flight, which also serializes reads and
//! writes of the conversation's continuation token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::continuation::ContinuationStore;
use crate::chat::request::ChatRequest;
use crate::chat::title::generate_title;
use crate::config::Settings;
use crate::error::{ApiError, Result, TallyError};
use crate::index::{IndexHandle, IndexRegistry};
use crate::llm::provider::{LlmProvider, TurnRequest};
use crate::router::{ModelTier, RouteDecision, RouteInput, RouteMode, Router};
use crate::store::{Completion, ConversationRepository, ConversationSummary, Turn};
use crate::stream::transcoder::{
    OutputSink, OutputStream, TranscodeReport, Transcoder, Upstream,
};

const LOG_TARGET: &str = "tally.chat.controller";

/// Lifecycle of one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// User turn persisted, provider call being prepared
    Sending,
    /// Provider call issued, transcoder attached
    Streaming,
    /// Answer persisted in full
    Settled,
    /// Answer persisted as truncated
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Sending => "sending",
            TurnState::Streaming => "streaming",
            TurnState::Settled => "settled",
            TurnState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Settled | TurnState::Failed)
    }

    pub fn can_advance_to(&self, next: TurnState) -> bool {
        matches!(
            (self, next),
            (TurnState::Idle, TurnState::Sending)
                | (TurnState::Sending, TurnState::Streaming)
                | (TurnState::Streaming, TurnState::Settled)
                | (TurnState::Streaming, TurnState::Failed)
        )
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TurnTracker {
    conversation_id: Uuid,
    state: TurnState,
}

impl TurnTracker {
    fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            state: TurnState::Idle,
        }
    }

    fn advance(&mut self, next: TurnState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                target: LOG_TARGET,
                conversation_id = %self.conversation_id,
                from = %self.state,
                to = %next,
                "ignoring invalid turn transition"
            );
            return;
        }
        tracing::info!(
            target: LOG_TARGET,
            conversation_id = %self.conversation_id,
            from = %self.state,
            state = %next,
            "turn state"
        );
        self.state = next;
    }
}

type InFlightMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Conversations with a turn in `Sending` or `Streaming`
#[derive(Debug, Default, Clone)]
struct InFlight {
    turns: InFlightMap,
}

impl InFlight {
    fn acquire(&self, conversation_id: Uuid) -> Result<InFlightGuard> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if turns.contains_key(&conversation_id) {
            return Err(TallyError::TurnInProgress(conversation_id.to_string()));
        }
        let token = CancellationToken::new();
        turns.insert(conversation_id, token.clone());
        Ok(InFlightGuard {
            turns: self.turns.clone(),
            conversation_id,
            token,
        })
    }

    fn cancel(&self, conversation_id: Uuid) -> bool {
        let turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        match turns.get(&conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn contains(&self, conversation_id: Uuid) -> bool {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&conversation_id)
    }
}

/// Releases the conversation's in-flight slot on drop
struct InFlightGuard {
    turns: InFlightMap,
    conversation_id: Uuid,
    token: CancellationToken,
}

impl InFlightGuard {
    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.conversation_id);
    }
}

/// Per-turn limits and prompts
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub deadline: Duration,
    pub channel_capacity: usize,
    pub instructions_fast: String,
    pub instructions_deep: String,
    pub max_output_tokens: u32,
    /// Sent to the fast model only
    pub temperature: Option<f32>,
}

impl ControllerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            deadline: Duration::from_secs(settings.turn.deadline_secs),
            channel_capacity: settings.turn.channel_capacity,
            instructions_fast: settings.turn.instructions_fast.clone(),
            instructions_deep: settings.turn.instructions_deep.clone(),
            max_output_tokens: settings.models.max_output_tokens,
            temperature: Some(settings.models.temperature),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// One user submission
#[derive(Debug, Clone)]
pub struct TurnSubmission {
    pub user_id: String,
    pub message: String,
    pub conversation_id: Option<Uuid>,
    pub files: Vec<String>,
    pub mode: RouteMode,
}

impl TurnSubmission {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            conversation_id: None,
            files: Vec::new(),
            mode: RouteMode::Auto,
        }
    }

    pub fn from_request(user_id: impl Into<String>, request: ChatRequest) -> Self {
        let mode = request.route_mode();
        Self {
            user_id: user_id.into(),
            message: request.message,
            conversation_id: request.conversation_id,
            files: request.files,
            mode,
        }
    }

    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_mode(mut self, mode: RouteMode) -> Self {
        self.mode = mode;
        self
    }
}

/// How a turn settled
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub conversation_id: Uuid,
    /// `Settled` or `Failed`
    pub state: TurnState,
    pub completion: Completion,
    pub report: TranscodeReport,
    /// Whether the assistant turn reached the repository
    pub persisted: bool,
}

/// A submitted turn
pub struct TurnHandle {
    pub conversation_id: Uuid,
    pub route: RouteDecision,
    /// Marker-multiplexed response body
    pub body: OutputStream,
    /// Resolves once the turn is settled. Dropping it detaches the turn.
    pub settled: JoinHandle<TurnSummary>,
}

/// Orchestrates turns across conversations
pub struct ConversationController {
    provider: Arc<dyn LlmProvider>,
    repository: Arc<dyn ConversationRepository>,
    continuations: Arc<dyn ContinuationStore>,
    indexes: Arc<dyn IndexRegistry>,
    router: Router,
    options: ControllerOptions,
    in_flight: InFlight,
}

impl ConversationController {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        repository: Arc<dyn ConversationRepository>,
        continuations: Arc<dyn ContinuationStore>,
        indexes: Arc<dyn IndexRegistry>,
        router: Router,
        options: ControllerOptions,
    ) -> Self {
        Self {
            provider,
            repository,
            continuations,
            indexes,
            router,
            options,
            in_flight: InFlight::default(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        provider: Arc<dyn LlmProvider>,
        repository: Arc<dyn ConversationRepository>,
        continuations: Arc<dyn ContinuationStore>,
        indexes: Arc<dyn IndexRegistry>,
    ) -> Self {
        Self::new(
            provider,
            repository,
            continuations,
            indexes,
            Router::new(&settings.models, &settings.router),
            ControllerOptions::from_settings(settings),
        )
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Whether the conversation has a turn in `Sending` or `Streaming`
    pub fn is_in_flight(&self, conversation_id: Uuid) -> bool {
        self.in_flight.contains(conversation_id)
    }

    /// Start a turn.
    ///
    /// Fails before anything is persisted on empty input, a blank file id,
    /// an unknown conversation, or a turn already in flight. Once this returns `Ok`
    /// the turn always settles, and its errors arrive through the body.
    pub async fn submit(&self, submission: TurnSubmission) -> Result<TurnHandle> {
        let message = submission.message.trim();
        if message.is_empty() {
            return Err(TallyError::InvalidInput("message must not be empty".to_string()));
        }
        let user_id = submission.user_id.as_str();
        let files = normalize_files(&submission.files)?;

        let conversation_id = match submission.conversation_id {
            Some(id) => {
                if self.repository.conversation(id, user_id).await?.is_none() {
                    return Err(TallyError::NotFound(format!("conversation {}", id)));
                }
                id
            }
            None => {
                let title = generate_title(message);
                let id = self.repository.create_conversation(user_id, &title).await?;
                tracing::info!(
                    target: LOG_TARGET,
                    conversation_id = %id,
                    title = %title,
                    "conversation created"
                );
                id
            }
        };

        let guard = self.in_flight.acquire(conversation_id)?;
        let mut tracker = TurnTracker::new(conversation_id);

        for file_id in &files {
            self.indexes.attach_file(user_id, file_id).await?;
        }
        let has_files = !files.is_empty();

        self.repository
            .append_turn(conversation_id, &Turn::user(message, files))
            .await?;
        tracker.advance(TurnState::Sending);

        let decision = self.route(user_id, message, submission.mode, has_files).await;
        let previous = match self.continuations.get(conversation_id).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    conversation_id = %conversation_id,
                    error = %e,
                    "continuation token unavailable; sending without context"
                );
                None
            }
        };
        let request = self.build_request(message, &decision, previous);

        tracing::info!(
            target: LOG_TARGET,
            conversation_id = %conversation_id,
            model = %decision.model,
            tools = decision.tools.len(),
            continued = request.previous_response_id.is_some(),
            "turn routed"
        );

        let (sink, body) = OutputSink::channel(self.options.channel_capacity);
        let deadline = deadline_from_now(self.options.deadline);
        let transcoder = Transcoder::new(sink, guard.token(), deadline);

        let task = TurnTask {
            provider: self.provider.clone(),
            repository: self.repository.clone(),
            continuations: self.continuations.clone(),
            rich: decision.supports_tool_streaming,
            request,
            deadline,
            guard,
            tracker,
        };
        let settled = tokio::spawn(task.run(transcoder));

        Ok(TurnHandle {
            conversation_id,
            route: decision,
            body,
            settled,
        })
    }

    /// A user's conversations, most recently updated first
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.repository.list_conversations(user_id).await
    }

    /// Turns of one conversation
    pub async fn turns(&self, conversation_id: Uuid, user_id: &str) -> Result<Vec<Turn>> {
        self.repository.turns(conversation_id, user_id).await
    }

    /// Delete a conversation, cancelling its in-flight turn first.
    /// Returns false if the user has no such conversation.
    pub async fn delete_conversation(&self, conversation_id: Uuid, user_id: &str) -> Result<bool> {
        if self
            .repository
            .conversation(conversation_id, user_id)
            .await?
            .is_none()
        {
            return Ok(false);
        }
        if self.in_flight.cancel(conversation_id) {
            tracing::info!(
                target: LOG_TARGET,
                conversation_id = %conversation_id,
                "cancelled in-flight turn of deleted conversation"
            );
        }
        self.repository
            .delete_conversation(conversation_id, user_id)
            .await
    }

    /// Attach an uploaded provider file to the user's document index
    pub async fn attach_file(&self, user_id: &str, file_id: &str) -> Result<IndexHandle> {
        self.indexes.attach_file(user_id, file_id).await
    }

    async fn route(
        &self,
        user_id: &str,
        message: &str,
        mode: RouteMode,
        has_files: bool,
    ) -> RouteDecision {
        let global = self.indexes.global_index().await;
        let user_index = if has_files {
            self.indexes.user_index(user_id).await
        } else {
            None
        };
        let input = RouteInput::new(message, mode)
            .with_global_index(global.as_ref())
            .with_user_files(user_index.as_ref(), has_files);
        self.router.decide(&input)
    }

    fn build_request(
        &self,
        message: &str,
        decision: &RouteDecision,
        previous: Option<String>,
    ) -> TurnRequest {
        let (instructions, temperature) = match decision.tier {
            ModelTier::Fast => (&self.options.instructions_fast, self.options.temperature),
            ModelTier::Deep => (&self.options.instructions_deep, None),
        };
        TurnRequest::new(decision.model.clone(), message)
            .with_instructions(instructions.clone())
            .with_tools(decision.tools.clone())
            .with_previous_response(previous)
            .with_max_output_tokens(self.options.max_output_tokens)
            .with_temperature(temperature)
    }
}

/// Trimmed file ids; a blank id rejects the whole submission
fn normalize_files(files: &[String]) -> Result<Vec<String>> {
    files
        .iter()
        .map(|f| {
            let f = f.trim();
            if f.is_empty() {
                Err(TallyError::InvalidInput("file id must not be empty".to_string()))
            } else {
                Ok(f.to_string())
            }
        })
        .collect()
}

/// Stand-in for deadlines past what the clock can represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_from_now(deadline: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(deadline)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Everything the spawned half of a turn owns
struct TurnTask {
    provider: Arc<dyn LlmProvider>,
    repository: Arc<dyn ConversationRepository>,
    continuations: Arc<dyn ContinuationStore>,
    rich: bool,
    request: TurnRequest,
    deadline: Instant,
    guard: InFlightGuard,
    tracker: TurnTracker,
}

impl TurnTask {
    async fn run(mut self, transcoder: Transcoder) -> TurnSummary {
        let cancel = self.guard.token();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = tokio::time::timeout_at(self.deadline, self.open()) => Some(match opened {
                Ok(result) => result,
                Err(_) => Err(TallyError::Api(ApiError::Timeout)),
            }),
        };
        self.tracker.advance(TurnState::Streaming);

        let (report, body) = match opened {
            Some(Ok(upstream)) => transcoder.run(upstream).await,
            Some(Err(e)) => transcoder.fail(e.to_string()).await,
            None => transcoder.abort("turn cancelled"),
        };

        let summary = self.settle(report).await;
        // Free the slot before the body ends so the client can send the
        // next turn as soon as it reads the end of this one.
        drop(self.guard);
        body.finish().await;
        summary
    }

    async fn open(&self) -> Result<Upstream> {
        if self.rich {
            self.provider
                .stream_rich(self.request.clone())
                .await
                .map(Upstream::Rich)
        } else {
            self.provider
                .stream_delta_only(self.request.clone())
                .await
                .map(Upstream::DeltaOnly)
        }
    }

    async fn settle(&mut self, report: TranscodeReport) -> TurnSummary {
        let conversation_id = self.tracker.conversation_id;
        let (state, completion) = if report.is_complete() {
            (TurnState::Settled, Completion::Complete)
        } else {
            (TurnState::Failed, Completion::Truncated)
        };

        let turn = Turn::assistant(
            report.text.clone(),
            report.timeline.clone(),
            self.request.model.clone(),
            completion,
        );
        let persisted = match self.repository.append_turn(conversation_id, &turn).await {
            Ok(()) => true,
            Err(TallyError::NotFound(_)) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    conversation_id = %conversation_id,
                    "conversation deleted before the turn settled"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    target: LOG_TARGET,
                    conversation_id = %conversation_id,
                    error = %e,
                    "failed to persist assistant turn"
                );
                false
            }
        };

        if let Some(token) = &report.continuation {
            if let Err(e) = self.continuations.set(conversation_id, token).await {
                tracing::error!(
                    target: LOG_TARGET,
                    conversation_id = %conversation_id,
                    error = %e,
                    "failed to store continuation token"
                );
            }
        }

        self.tracker.advance(state);
        TurnSummary {
            conversation_id,
            state,
            completion,
            report,
            persisted,
        }
    }
}
