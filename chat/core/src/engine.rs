//! Conversation Reconciliation Engine
//!
//! Drives one exchange at a time per session: insert the user's message
//! optimistically, stream the reply, then commit or roll back.
//!
//! # Exchange Flow
//!
//! ```text
//! send_message("hello")
//!   │
//!   ├─ validate ──────────────── InvalidContent (nothing touched)
//!   ├─ begin_exchange ────────── ExchangeInFlight (nothing touched)
//!   │    user message visible, state Sending
//!   ├─ open_stream
//!   ├─ for each frame:
//!   │    ContentDelta ── buffer += text, on_chunk(text), state Streaming
//!   │    Complete ────── commit assistant message, on_complete(messages)
//!   │    Error ───────── rollback, on_error(Protocol)
//!   └─ transport failure / timeout / cancel ── rollback, on_error(..)
//! ```
//!
//! # Ownership
//!
//! The caller owns the [`SessionHandle`]. While the reply streams the engine
//! only holds a weak reference; dropping the last handle ends the exchange
//! with [`ExchangeError::SessionDropped`] and closes the stream. The session
//! lock is taken briefly per frame and never held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::messages::{ChatMessage, MessageId};
use crate::session::{ReconcileSummary, SessionHandle, WeakSession};
use crate::streaming::{decode_stream, StreamFrame};
use crate::transport::{ChatTransport, StreamRequest};

/// Default whole-exchange deadline
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default maximum silence between frames
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default outgoing message limit, matching the backend's
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;

/// Engine limits and timeouts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for the whole exchange, from open to terminal frame
    pub exchange_timeout: Option<Duration>,
    /// Maximum wait for the next frame
    pub idle_timeout: Option<Duration>,
    /// Maximum outgoing message length in characters
    pub max_message_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: Some(DEFAULT_EXCHANGE_TIMEOUT),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

impl EngineConfig {
    /// No timeouts at all
    #[must_use]
    pub fn without_timeouts() -> Self {
        Self {
            exchange_timeout: None,
            idle_timeout: None,
            ..Self::default()
        }
    }
}

/// Receives the progress of one exchange
///
/// `on_chunk` is called zero or more times, in stream order. Exactly one of
/// `on_complete` or `on_error` follows, once. Calls happen synchronously
/// inside the decode loop, so keep them short.
pub trait ExchangeObserver {
    /// A delta arrived
    fn on_chunk(&mut self, _text: &str) {}

    /// The exchange committed; `messages` is the full committed sequence
    fn on_complete(&mut self, _messages: &[ChatMessage]) {}

    /// The exchange failed after it began
    fn on_error(&mut self, _error: &ExchangeError) {}
}

impl ExchangeObserver for () {}

type ChunkFn = Box<dyn FnMut(&str) + Send>;
type CompleteFn = Box<dyn FnMut(&[ChatMessage]) + Send>;
type ErrorFn = Box<dyn FnMut(&ExchangeError) + Send>;

/// Closure-based [`ExchangeObserver`]
///
/// ```
/// use persona_chat_core::engine::ExchangeCallbacks;
///
/// let callbacks = ExchangeCallbacks::new()
///     .with_chunk(|text| print!("{text}"))
///     .with_error(|err| eprintln!("{}", err.user_detail()));
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct ExchangeCallbacks {
    chunk: Option<ChunkFn>,
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
}

impl ExchangeCallbacks {
    /// No callbacks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` for every delta
    #[must_use]
    pub fn with_chunk(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.chunk = Some(Box::new(f));
        self
    }

    /// Call `f` once the exchange commits
    #[must_use]
    pub fn with_complete(mut self, f: impl FnMut(&[ChatMessage]) + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Call `f` if the exchange fails
    #[must_use]
    pub fn with_error(mut self, f: impl FnMut(&ExchangeError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for ExchangeCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeCallbacks")
            .field("on_chunk", &self.chunk.is_some())
            .field("on_complete", &self.complete.is_some())
            .field("on_error", &self.error.is_some())
            .finish()
    }
}

impl ExchangeObserver for ExchangeCallbacks {
    fn on_chunk(&mut self, text: &str) {
        if let Some(f) = self.chunk.as_mut() {
            f(text);
        }
    }

    fn on_complete(&mut self, messages: &[ChatMessage]) {
        if let Some(f) = self.complete.as_mut() {
            f(messages);
        }
    }

    fn on_error(&mut self, error: &ExchangeError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }
}

/// Summary of a committed exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Correlation id used in logs
    pub exchange_id: Uuid,
    /// The optimistic user message as committed
    pub user_message: Option<ChatMessage>,
    /// The assistant reply
    pub assistant_message: ChatMessage,
    /// Number of deltas folded into the reply
    pub deltas: u32,
    /// Time from begin to commit
    pub duration: Duration,
}

impl ExchangeReport {
    /// Whether the reply arrived without any content
    #[must_use]
    pub fn is_empty_reply(&self) -> bool {
        self.assistant_message.content.is_empty()
    }
}

/// An exchange that has been admitted but not run yet
struct Admitted {
    exchange_id: Uuid,
    user_message_id: MessageId,
    request: StreamRequest,
    session: WeakSession,
}

/// Chat engine
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct ChatEngine {
    transport: Arc<dyn ChatTransport>,
    config: EngineConfig,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ChatEngine {
    /// Create an engine over `transport`
    pub fn new(transport: impl ChatTransport + 'static, config: EngineConfig) -> Self {
        Self::from_shared(Arc::new(transport), config)
    }

    /// Create an engine over an already shared transport
    #[must_use]
    pub fn from_shared(transport: Arc<dyn ChatTransport>, config: EngineConfig) -> Self {
        Self { transport, config }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the underlying transport
    #[must_use]
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Check outgoing text against the content rules
    ///
    /// # Errors
    ///
    /// [`ExchangeError::InvalidContent`] for blank text or text longer than
    /// `max_message_chars` characters.
    pub fn validate_content(&self, text: &str) -> Result<(), ExchangeError> {
        if text.trim().is_empty() {
            return Err(ExchangeError::InvalidContent(
                "Message cannot be empty".to_string(),
            ));
        }

        let max = self.config.max_message_chars;
        let chars = text.chars().count();
        if max > 0 && chars > max {
            return Err(ExchangeError::InvalidContent(format!(
                "Message is {chars} characters; the limit is {max}"
            )));
        }
        Ok(())
    }

    /// Send `text` and stream the reply into `session`
    ///
    /// # Errors
    ///
    /// Rejections ([`ExchangeError::is_rejection`]) are returned without
    /// touching the session or calling `observer`. Any later failure rolls
    /// the exchange back, is reported to `observer.on_error`, and returned.
    pub async fn send_message<O>(
        &self,
        session: &SessionHandle,
        text: &str,
        observer: &mut O,
    ) -> Result<ExchangeReport, ExchangeError>
    where
        O: ExchangeObserver + ?Sized,
    {
        self.send_message_with_cancel(session, text, observer, CancellationToken::new())
            .await
    }

    /// [`send_message`](Self::send_message) with an external cancellation token
    ///
    /// Cancelling the token closes the stream and rolls the exchange back
    /// with [`ExchangeError::Cancelled`].
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn send_message_with_cancel<O>(
        &self,
        session: &SessionHandle,
        text: &str,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> Result<ExchangeReport, ExchangeError>
    where
        O: ExchangeObserver + ?Sized,
    {
        let admitted = self.admit(session, text)?;
        let span = exchange_span(&admitted);
        run_exchange(
            Arc::clone(&self.transport),
            self.config.clone(),
            admitted,
            observer,
            cancel,
        )
        .instrument(span)
        .await
    }

    /// Run an exchange on a background task
    ///
    /// Rejections are returned immediately; once this returns `Ok` the user
    /// message is already visible in the session.
    ///
    /// # Errors
    ///
    /// Returns the rejection when the exchange cannot begin.
    pub fn spawn_message<O>(
        &self,
        session: &SessionHandle,
        text: &str,
        mut observer: O,
    ) -> Result<ExchangeHandle, ExchangeError>
    where
        O: ExchangeObserver + Send + 'static,
    {
        let admitted = self.admit(session, text)?;
        let exchange_id = admitted.exchange_id;
        let span = exchange_span(&admitted);
        let cancel = CancellationToken::new();

        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        let token = cancel.clone();
        let task = tokio::spawn(
            async move { run_exchange(transport, config, admitted, &mut observer, token).await }
                .instrument(span),
        );

        Ok(ExchangeHandle {
            exchange_id,
            cancel,
            task,
        })
    }

    /// Load the backend's history into an idle session
    ///
    /// Returns the number of messages loaded.
    ///
    /// # Errors
    ///
    /// Transport failures, or [`ExchangeError::ExchangeInFlight`] when an
    /// exchange is pending.
    pub async fn load_history(&self, session: &SessionHandle) -> Result<usize, ExchangeError> {
        let session_id = session.id();
        let history = self.transport.fetch_history(&session_id).await?;
        let count = history.len();
        session.lock().hydrate(history)?;

        tracing::info!(session_id = %session_id, messages = count, "History loaded");
        Ok(count)
    }

    /// Reconcile the session with the backend's history
    ///
    /// Provisional messages are swapped for their confirmed counterparts.
    ///
    /// # Errors
    ///
    /// Transport failures, or [`ExchangeError::ExchangeInFlight`] when an
    /// exchange is pending.
    pub async fn refresh(&self, session: &SessionHandle) -> Result<ReconcileSummary, ExchangeError> {
        let session_id = session.id();
        let history = self.transport.fetch_history(&session_id).await?;
        let summary = session.lock().reconcile(history)?;

        tracing::info!(
            session_id = %session_id,
            confirmed = summary.confirmed,
            added = summary.added,
            "Session reconciled"
        );
        Ok(summary)
    }

    /// Validate and begin; the only place an exchange can be rejected
    fn admit(&self, session: &SessionHandle, text: &str) -> Result<Admitted, ExchangeError> {
        self.validate_content(text)?;

        let mut guard = session.lock();
        let user_message_id = guard.begin_exchange(text)?;
        let request = StreamRequest::new(guard.id().clone(), text);
        drop(guard);

        Ok(Admitted {
            exchange_id: Uuid::new_v4(),
            user_message_id,
            request,
            session: session.downgrade(),
        })
    }
}

/// Handle to an exchange running on a background task
#[derive(Debug)]
pub struct ExchangeHandle {
    exchange_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExchangeReport, ExchangeError>>,
}

impl ExchangeHandle {
    /// Correlation id of the exchange
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.exchange_id
    }

    /// Request cancellation; the exchange rolls back
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this exchange
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the exchange has resolved
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the exchange to resolve
    ///
    /// # Errors
    ///
    /// The exchange's own error, or [`ExchangeError::Cancelled`] if the task
    /// was aborted by the runtime.
    pub async fn join(self) -> Result<ExchangeReport, ExchangeError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ExchangeError::Cancelled),
        }
    }
}

fn exchange_span(admitted: &Admitted) -> tracing::Span {
    tracing::info_span!(
        "exchange",
        exchange_id = %admitted.exchange_id,
        session_id = %admitted.request.session_id,
    )
}

/// Drive an admitted exchange to commit or rollback
async fn run_exchange<O>(
    transport: Arc<dyn ChatTransport>,
    config: EngineConfig,
    admitted: Admitted,
    observer: &mut O,
    cancel: CancellationToken,
) -> Result<ExchangeReport, ExchangeError>
where
    O: ExchangeObserver + ?Sized,
{
    let started = Instant::now();
    let outcome = stream_reply(
        transport.as_ref(),
        &config,
        &admitted,
        observer,
        &cancel,
    )
    .await;

    match outcome {
        Ok(()) => commit(&admitted, started, observer),
        Err(error) => {
            rollback(&admitted, &error);
            observer.on_error(&error);
            Err(error)
        }
    }
}

/// Open the stream and fold frames until `Complete`
async fn stream_reply<O>(
    transport: &dyn ChatTransport,
    config: &EngineConfig,
    admitted: &Admitted,
    observer: &mut O,
    cancel: &CancellationToken,
) -> Result<(), ExchangeError>
where
    O: ExchangeObserver + ?Sized,
{
    let deadline = config.exchange_timeout.map(|t| Instant::now() + t);

    tracing::debug!(transport = transport.name(), "Opening reply stream");
    let body = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ExchangeError::Cancelled),
        () = admitted.session.abandoned() => return Err(ExchangeError::SessionDropped),
        () = sleep_until(deadline) => return Err(ExchangeError::Timeout),
        opened = transport.open_stream(&admitted.request) => opened?,
    };

    let frames = decode_stream(body);
    futures::pin_mut!(frames);

    loop {
        let idle_deadline = config.idle_timeout.map(|t| Instant::now() + t);
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExchangeError::Cancelled),
            () = admitted.session.abandoned() => {
                tracing::debug!("Session abandoned; closing the stream");
                return Err(ExchangeError::SessionDropped);
            }
            () = sleep_until(deadline) => return Err(ExchangeError::Timeout),
            () = sleep_until(idle_deadline) => {
                tracing::debug!("No frame within the idle timeout");
                return Err(ExchangeError::Timeout);
            }
            next = frames.next() => next,
        };

        let Some(session) = admitted.session.upgrade() else {
            return Err(ExchangeError::SessionDropped);
        };

        match next {
            Some(Ok(StreamFrame::ContentDelta(text))) => {
                session.lock().append_delta(&text);
                tracing::debug!(bytes = text.len(), "Delta");
                observer.on_chunk(&text);
            }
            Some(Ok(StreamFrame::Complete)) => return Ok(()),
            Some(Ok(StreamFrame::Error(message))) => return Err(ExchangeError::Protocol(message)),
            Some(Err(error)) => return Err(ExchangeError::Transport(error)),
            None => return Err(ExchangeError::StreamEnded),
        }
    }
}

fn commit<O>(
    admitted: &Admitted,
    started: Instant,
    observer: &mut O,
) -> Result<ExchangeReport, ExchangeError>
where
    O: ExchangeObserver + ?Sized,
{
    let Some(session) = admitted.session.upgrade() else {
        let error = ExchangeError::SessionDropped;
        observer.on_error(&error);
        return Err(error);
    };

    let (committed, messages) = {
        let mut guard = session.lock();
        let committed = guard.commit_exchange();
        (committed, guard.messages().to_vec())
    };

    // The pending exchange can only vanish if someone else resolved it
    let Some(committed) = committed else {
        let error = ExchangeError::StreamEnded;
        tracing::warn!(error = %error, "Pending exchange was already resolved");
        observer.on_error(&error);
        return Err(error);
    };

    let duration = started.elapsed();
    tracing::info!(
        message_id = %committed.assistant_message.id,
        deltas = committed.deltas,
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        "Exchange committed"
    );

    observer.on_complete(&messages);

    Ok(ExchangeReport {
        exchange_id: admitted.exchange_id,
        user_message: committed.user_message,
        assistant_message: committed.assistant_message,
        deltas: committed.deltas,
        duration,
    })
}

fn rollback(admitted: &Admitted, error: &ExchangeError) {
    let Some(session) = admitted.session.upgrade() else {
        tracing::debug!(error = %error, "Session dropped; nothing to roll back");
        return;
    };

    let rolled_back = session.lock().rollback_exchange();
    match rolled_back {
        Some(rolled_back) => tracing::warn!(
            error = %error,
            message_id = %admitted.user_message_id,
            discarded = rolled_back.discarded.len(),
            "Exchange rolled back"
        ),
        None => tracing::warn!(error = %error, "Exchange failed with nothing pending"),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
