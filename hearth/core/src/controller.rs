//! Session Controller
//!
//! The per-conversation state machine that drives one outgoing message from
//! request to committed transcript record.
//!
//! ```text
//!        begin()/start()
//!   Idle ─────────────▶ Streaming ──┬──▶ Completed   (done event or natural end)
//!                                   ├──▶ Errored     (transport failure or error event)
//!                                   └──▶ Cancelled   (cancel(), handle, new start, drop)
//! ```
//!
//! # Concurrency
//!
//! All session state is owned by the controller and mutated only from the task
//! that calls [`SessionController::step`]. The only thing shared with other
//! tasks is the session's [`CancellationToken`] (through [`SessionHandle`]).
//! Each `step` waits on exactly one suspension point: cancellation, the next
//! render tick, or the next chunk, in that priority order. The first step of
//! a session opens the stream instead, racing the open against cancellation. On resume the
//! token is checked again before any state is touched, so a chunk that was
//! already in flight when `cancel` was called is discarded, never applied.
//!
//! # Terminal Transitions
//!
//! Every terminal transition, whatever its cause, goes through one path that:
//! 1. stops the transport
//! 2. performs the single final render flush
//! 3. commits records to the message store
//! 4. announces the new state (plus one notice for failures)
//! 5. re-reads the token meter for the budget policy

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{AttachmentRef, ChatRequest, OpenStream, StreamTransport, TransportError};
use crate::budget::{estimate_tokens, BudgetNotice, ConversationBudget, TokenMeter};
use crate::config::ClientConfig;
use crate::messages::{ChatRecord, MessageRole, NotifyLevel, SessionId, StreamState, ViewEvent};
use crate::streaming::{
    wait_for_tick, ContentAccumulator, DeltaEvent, EventParser, FrameDecoder, RenderScheduler,
    ScheduleStats,
};
use crate::transcript::MessageStore;

/// Errors rejecting a `begin` or `start` call
///
/// Transport failures are not reported here: they put the new session into
/// `Errored` instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// The message has no content
    #[error("Message is empty")]
    EmptyMessage,

    /// The request cannot be built from the current configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a session ended in `Errored`
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamFailure {
    /// Opening or reading the stream failed
    #[error(transparent)]
    Transport(TransportError),

    /// The server sent an error event mid-stream
    #[error("Server error: {0}")]
    Upstream(String),
}

/// One outgoing user message
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prompt {
    /// The message text
    pub message: String,
    /// System instruction for this message (falls back to the configured one)
    pub system: Option<String>,
    /// Files already resolved by the upload subsystem
    pub attachments: Vec<AttachmentRef>,
}

impl Prompt {
    /// Create a prompt with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach a resolved file
    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Cancel capability for a started session
///
/// Cheap to clone and safe to move to another task (a signal handler, a
/// view being torn down).
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// The session this handle controls
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A clone of the underlying token
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// What one call to [`SessionController::step`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The transport opened the stream
    Opened,
    /// A render tick fired
    Painted,
    /// A chunk was decoded into this many complete lines
    Received {
        /// Lines completed by the chunk
        lines: usize,
    },
    /// The session reached a terminal state
    Finished(StreamState),
}

/// What woke a step
enum Wake {
    Cancelled,
    Tick(u64),
    Chunk(Option<Result<bytes::Bytes, TransportError>>),
}

/// State of the current stream session
struct LiveSession {
    id: SessionId,
    state: StreamState,
    cancel: CancellationToken,
    /// Request waiting to be opened by the first step
    request: Option<ChatRequest>,
    stream: Option<OpenStream>,
    decoder: FrameDecoder,
    accumulator: ContentAccumulator,
    scheduler: RenderScheduler,
    failure: Option<StreamFailure>,
    model: String,
    user_message: String,
    bytes_received: usize,
    started_at: Instant,
}

/// Drives stream sessions for one conversation view
pub struct SessionController<T: StreamTransport> {
    transport: Arc<T>,
    store: Arc<dyn MessageStore>,
    meter: Arc<dyn TokenMeter>,
    config: ClientConfig,
    parser: EventParser,
    budget: ConversationBudget,
    view_tx: mpsc::UnboundedSender<ViewEvent>,
    session: Option<LiveSession>,
}

impl<T: StreamTransport> SessionController<T> {
    /// Create a controller
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn MessageStore>,
        meter: Arc<dyn TokenMeter>,
        config: ClientConfig,
        view_tx: mpsc::UnboundedSender<ViewEvent>,
    ) -> Self {
        let parser = EventParser::new(config.wire.clone());
        let budget = ConversationBudget::new(config.context_limit, config.near_limit_fraction);
        Self {
            transport,
            store,
            meter,
            config,
            parser,
            budget,
            view_tx,
            session: None,
        }
    }

    /// Start a session for one outgoing message and open its stream
    ///
    /// Same as [`begin`](Self::begin) followed by the first step. Open
    /// failures leave the new session in `Errored`; the handle is still
    /// returned so the caller can inspect it.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError` if the message is empty or no model is set.
    pub async fn start(&mut self, prompt: Prompt) -> Result<SessionHandle, ControllerError> {
        let handle = self.begin(prompt)?;
        self.open_pending().await;
        Ok(handle)
    }

    /// Create a streaming session without touching the transport
    ///
    /// Any live session is cancelled and torn down first. A pending
    /// summarization request is consumed here, even if the open then fails.
    /// The returned handle can cancel the session before and during the open,
    /// which happens on the next [`step`](Self::step).
    ///
    /// # Errors
    ///
    /// Returns `ControllerError` if the message is empty or no model is set.
    pub fn begin(&mut self, prompt: Prompt) -> Result<SessionHandle, ControllerError> {
        if prompt.message.trim().is_empty() {
            return Err(ControllerError::EmptyMessage);
        }
        if self.config.model.trim().is_empty() {
            return Err(ControllerError::InvalidRequest(
                "no model configured".to_string(),
            ));
        }

        if self.is_streaming() {
            tracing::debug!("New message while streaming, cancelling previous session");
            self.finish(StreamState::Cancelled);
        }
        self.session = None;

        let mut request = ChatRequest::new(prompt.message.clone(), self.config.model.clone())
            .with_params(self.config.params.clone());
        request.system = prompt.system.or_else(|| self.config.system_prompt.clone());
        request.attachments = prompt.attachments;

        let summarize = self.budget.take_summarization();
        if summarize {
            request.append_system_directive(&self.config.summarize_directive);
        }

        let session_id = SessionId::new();
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            session_id: session_id.clone(),
            cancel_token: cancel.clone(),
        };

        self.session = Some(LiveSession {
            id: session_id.clone(),
            state: StreamState::Idle,
            cancel,
            request: None,
            stream: None,
            decoder: FrameDecoder::new(),
            accumulator: ContentAccumulator::new(),
            scheduler: RenderScheduler::with_interval(self.config.frame_interval()),
            failure: None,
            model: request.model.clone(),
            user_message: prompt.message,
            bytes_received: 0,
            started_at: Instant::now(),
        });

        tracing::info!(
            session_id = %session_id,
            model = %request.model,
            transport = self.transport.name(),
            summarize,
            "Starting stream session"
        );

        self.emit(ViewEvent::SessionStarted {
            session_id: session_id.clone(),
            model: request.model.clone(),
        });
        if let Some(session) = self.session.as_mut() {
            session.request = Some(request);
        }
        self.set_streaming();

        Ok(handle)
    }

    /// Process exactly one suspension point
    ///
    /// Returns `None` when there is no streaming session.
    pub async fn step(&mut self) -> Option<StepOutcome> {
        let session = self.session.as_mut()?;
        if session.state.is_terminal() {
            return None;
        }

        let cancel = session.cancel.clone();
        if cancel.is_cancelled() {
            self.finish(StreamState::Cancelled);
            return Some(StepOutcome::Finished(StreamState::Cancelled));
        }

        if session.stream.is_none() {
            return Some(self.open_pending().await);
        }

        let tick = session.scheduler.outstanding();
        let Some(stream) = session.stream.as_mut() else {
            return None;
        };

        let wake = tokio::select! {
            biased;
            () = cancel.cancelled() => Wake::Cancelled,
            id = wait_for_tick(tick) => Wake::Tick(id),
            chunk = stream.next_chunk() => Wake::Chunk(chunk),
        };

        // Cancellation may have landed while the read was resolving.
        if matches!(wake, Wake::Cancelled) || cancel.is_cancelled() {
            if let Wake::Chunk(Some(Ok(bytes))) = &wake {
                tracing::debug!(bytes = bytes.len(), "Discarding chunk received after cancellation");
            }
            self.finish(StreamState::Cancelled);
            return Some(StepOutcome::Finished(StreamState::Cancelled));
        }

        match wake {
            Wake::Cancelled => None,
            Wake::Tick(id) => {
                self.fire_tick(id);
                Some(StepOutcome::Painted)
            }
            Wake::Chunk(Some(Ok(bytes))) => Some(self.on_chunk(&bytes, &cancel)),
            Wake::Chunk(Some(Err(e))) => {
                self.fail(StreamFailure::Transport(e));
                Some(StepOutcome::Finished(StreamState::Errored))
            }
            Wake::Chunk(None) => Some(self.on_stream_end()),
        }
    }

    /// Step until the current session is terminal
    pub async fn drive(&mut self) -> StreamState {
        while let Some(outcome) = self.step().await {
            if let StepOutcome::Finished(state) = outcome {
                return state;
            }
        }
        self.state()
    }

    /// Cancel the streaming session
    ///
    /// Returns false if nothing was streaming.
    pub fn cancel(&mut self) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.finish(StreamState::Cancelled);
        true
    }

    /// Accept the summarization offer for the next message
    pub fn accept_summarization(&mut self) {
        tracing::info!("Summarization accepted for next message");
        self.budget.request_summarization();
    }

    /// Decline (or withdraw) the summarization offer
    pub fn decline_summarization(&mut self) {
        self.budget.clear_summarization();
    }

    /// Re-read the token meter; notifies the view on a threshold crossing
    pub fn check_budget(&mut self) -> Option<BudgetNotice> {
        let snapshot = self.meter.snapshot(self.store.len());
        let notice = self.budget.observe(snapshot)?;
        self.emit(ViewEvent::BudgetNearLimit {
            estimated_tokens: notice.estimated_tokens,
            limit: notice.limit,
        });
        Some(notice)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// State of the current (or last) session
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.session.as_ref().map_or(StreamState::Idle, |s| s.state)
    }

    /// Whether a session is streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    /// Committed text of the current (or last) session
    #[must_use]
    pub fn committed_text(&self) -> &str {
        self.session
            .as_ref()
            .map_or("", |s| s.accumulator.committed())
    }

    /// Failure recorded by the last session, if it errored
    #[must_use]
    pub fn failure(&self) -> Option<&StreamFailure> {
        self.session.as_ref().and_then(|s| s.failure.as_ref())
    }

    /// ID of the current (or last) session
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    /// Render coalescing counters of the current (or last) session
    #[must_use]
    pub fn schedule_stats(&self) -> Option<ScheduleStats> {
        self.session.as_ref().map(|s| s.scheduler.stats())
    }

    /// Context budget state
    #[must_use]
    pub fn budget(&self) -> &ConversationBudget {
        &self.budget
    }

    /// The transport
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn emit(&self, event: ViewEvent) {
        if self.view_tx.send(event).is_err() {
            tracing::trace!("View receiver dropped, discarding event");
        }
    }

    fn set_streaming(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = StreamState::Streaming;
        let session_id = session.id.clone();
        self.emit(ViewEvent::StateChanged {
            session_id,
            state: StreamState::Streaming,
        });
    }

    /// Open the stream for the session created by `begin`
    async fn open_pending(&mut self) -> StepOutcome {
        let pending = self.session.as_mut().and_then(|session| {
            let request = session.request.take()?;
            Some((request, session.cancel.clone()))
        });
        let Some((request, cancel)) = pending else {
            self.fail(StreamFailure::Transport(TransportError::Closed(
                "stream was never opened".to_string(),
            )));
            return StepOutcome::Finished(StreamState::Errored);
        };

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            opened = self.transport.open(&request, cancel.clone()) => Some(opened),
        };

        let opened = match opened {
            Some(opened) if !cancel.is_cancelled() => opened,
            _ => {
                tracing::debug!("Cancelled while opening stream");
                self.finish(StreamState::Cancelled);
                return StepOutcome::Finished(StreamState::Cancelled);
            }
        };

        match opened {
            Ok(stream) => {
                if let Some(session) = self.session.as_mut() {
                    session.stream = Some(stream);
                }
                StepOutcome::Opened
            }
            Err(e) => {
                self.fail(StreamFailure::Transport(e));
                StepOutcome::Finished(StreamState::Errored)
            }
        }
    }

    fn fire_tick(&mut self, tick_id: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(update) = session.scheduler.fire(tick_id, &mut session.accumulator) {
            let session_id = session.id.clone();
            self.emit(ViewEvent::Render { session_id, update });
        }
    }

    fn on_chunk(&mut self, bytes: &[u8], cancel: &CancellationToken) -> StepOutcome {
        let lines = match self.session.as_mut() {
            Some(session) => {
                session.bytes_received += bytes.len();
                session.decoder.push(bytes)
            }
            None => Vec::new(),
        };

        for (index, line) in lines.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(
                    discarded = lines.len() - index,
                    "Cancelled mid-chunk, discarding remaining lines"
                );
                self.finish(StreamState::Cancelled);
                return StepOutcome::Finished(StreamState::Cancelled);
            }
            if let Some(state) = self.apply_line(line) {
                return StepOutcome::Finished(state);
            }
        }

        StepOutcome::Received { lines: lines.len() }
    }

    /// Apply one line; returns the terminal state if it ended the session
    fn apply_line(&mut self, line: &str) -> Option<StreamState> {
        let event = self.parser.parse(line);
        let session = self.session.as_mut()?;

        if let Some(text) = event.text() {
            session.accumulator.apply(text);
            if !event.is_terminal() {
                session.scheduler.on_delta(Instant::now());
            }
        }

        match event {
            DeltaEvent::ContentDelta(_) | DeltaEvent::Unknown => None,
            DeltaEvent::Done { .. } => {
                self.finish(StreamState::Completed);
                Some(StreamState::Completed)
            }
            DeltaEvent::Error { message, .. } => {
                self.fail(StreamFailure::Upstream(message));
                Some(StreamState::Errored)
            }
        }
    }

    fn on_stream_end(&mut self) -> StepOutcome {
        let tail = self.session.as_mut().and_then(|s| s.decoder.finish());
        if let Some(line) = tail {
            if let Some(state) = self.apply_line(&line) {
                return StepOutcome::Finished(state);
            }
        }

        tracing::debug!("Stream ended without a completion event");
        self.finish(StreamState::Completed);
        StepOutcome::Finished(StreamState::Completed)
    }

    fn fail(&mut self, failure: StreamFailure) {
        if let Some(session) = self.session.as_mut() {
            if !session.state.is_terminal() {
                session.failure = Some(failure);
            }
        }
        self.finish(StreamState::Errored);
    }

    /// The single path into a terminal state
    fn finish(&mut self, state: StreamState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state.is_terminal() {
            return;
        }

        session.state = state;
        if state == StreamState::Cancelled {
            session.cancel.cancel();
        }
        // Dropping the stream aborts the underlying request.
        session.request = None;
        session.stream = None;
        session.decoder.clear();

        let flush = session
            .scheduler
            .final_flush(&mut session.accumulator, state);
        let committed = session.accumulator.committed().to_string();
        let session_id = session.id.clone();
        let model = session.model.clone();
        let user_message = std::mem::take(&mut session.user_message);
        let failure = session.failure.clone();
        let bytes_received = session.bytes_received;
        let elapsed_ms = u64::try_from(session.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        match (&state, &failure) {
            (StreamState::Errored, Some(failure)) => tracing::warn!(
                session_id = %session_id,
                error = %failure,
                chars = committed.len(),
                elapsed_ms,
                "Stream session failed"
            ),
            _ => tracing::info!(
                session_id = %session_id,
                state = ?state,
                chars = committed.len(),
                bytes = bytes_received,
                elapsed_ms,
                "Stream session ended"
            ),
        }

        if let Some(update) = flush {
            self.emit(ViewEvent::Render {
                session_id: session_id.clone(),
                update,
            });
        }

        self.persist(state, user_message, &committed, &model);

        self.emit(ViewEvent::StateChanged { session_id, state });
        if let Some(failure) = failure {
            self.emit(ViewEvent::Notice {
                level: NotifyLevel::Error,
                message: failure.to_string(),
            });
        }

        self.check_budget();
    }

    fn persist(&self, state: StreamState, user_message: String, committed: &str, model: &str) {
        let keep_assistant = match state {
            StreamState::Completed => true,
            StreamState::Errored => !committed.is_empty(),
            StreamState::Cancelled => {
                self.config.persist_partial_on_cancel && !committed.is_empty()
            }
            StreamState::Idle | StreamState::Streaming => false,
        };

        let user_tokens = estimate_tokens(&user_message);
        let mut records = vec![ChatRecord::user(user_message).with_token_count(user_tokens)];
        if keep_assistant {
            records.push(
                ChatRecord::new(MessageRole::Assistant, committed)
                    .with_model(model)
                    .with_token_count(estimate_tokens(committed)),
            );
        }

        for record in records {
            let role = record.role;
            if let Err(e) = self.store.commit(record) {
                tracing::warn!(error = %e, role = ?role, "Failed to persist message");
                self.emit(ViewEvent::Notice {
                    level: NotifyLevel::Warning,
                    message: format!("Could not save message: {e}"),
                });
            }
        }
    }
}

impl<T: StreamTransport> Drop for SessionController<T> {
    fn drop(&mut self) {
        if self.is_streaming() {
            tracing::debug!("Controller dropped while streaming");
            self.finish(StreamState::Cancelled);
        }
    }
}

impl<T: StreamTransport> std::fmt::Debug for SessionController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}
