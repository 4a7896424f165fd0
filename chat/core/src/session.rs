//! Session Management
//!
//! A [`ConversationSession`] owns the committed message sequence of one
//! conversation and at most one in-flight [`PendingExchange`].
//!
//! # Exchange Lifecycle
//!
//! ```text
//!            begin_exchange            append_delta
//!   Idle ───────────────────▶ Sending ─────────────▶ Streaming
//!    ▲                          │                        │
//!    │     commit_exchange /    │                        │
//!    └──── rollback_exchange ◀──┴────────────────────────┘
//! ```
//!
//! The optimistic user message is appended to the committed sequence as
//! soon as the exchange begins. Commit appends the assistant reply; rollback
//! removes the optimistic message again. Both locate entries by
//! [`MessageId`], never by position.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ExchangeError;
use crate::messages::{ChatMessage, MessageId, MessageRole, ServerMessage, SessionId};

/// Where a session is in its exchange lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// No exchange in flight
    Idle,
    /// Optimistic message inserted, nothing received yet
    Sending,
    /// At least one delta received
    Streaming,
}

/// An exchange that has not resolved yet
#[derive(Clone, Debug)]
pub struct PendingExchange {
    user_message_id: MessageId,
    buffer: String,
    received_any: bool,
    deltas: u32,
    started_at: Instant,
}

impl PendingExchange {
    fn new(user_message_id: MessageId) -> Self {
        Self {
            user_message_id,
            buffer: String::new(),
            received_any: false,
            deltas: 0,
            started_at: Instant::now(),
        }
    }

    /// Id of the optimistic user message
    #[must_use]
    pub fn user_message_id(&self) -> MessageId {
        self.user_message_id
    }

    /// Assistant text accumulated so far
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Whether any delta has arrived
    #[must_use]
    pub fn received_any(&self) -> bool {
        self.received_any
    }

    /// Number of deltas received
    #[must_use]
    pub fn deltas(&self) -> u32 {
        self.deltas
    }

    /// Time since the exchange began
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Result of committing an exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedExchange {
    /// The user message that opened the exchange
    pub user_message: Option<ChatMessage>,
    /// The assistant reply that was appended
    pub assistant_message: ChatMessage,
    /// Number of deltas folded into the reply
    pub deltas: u32,
}

/// Result of rolling an exchange back
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolledBackExchange {
    /// The optimistic message that was removed
    pub removed: Option<ChatMessage>,
    /// Partial assistant text that was discarded
    pub discarded: String,
}

/// Outcome of reconciling with the backend's history
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Provisional messages swapped for their confirmed versions
    pub confirmed: usize,
    /// Server messages that were not present locally
    pub added: usize,
}

/// Session bookkeeping
#[derive(Clone, Debug)]
pub struct SessionMetadata {
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last time an exchange began or resolved
    pub last_active_at: DateTime<Utc>,
    /// Exchanges that committed
    pub committed: u32,
    /// Exchanges that were rolled back
    pub rolled_back: u32,
}

impl SessionMetadata {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_active_at: now,
            committed: 0,
            rolled_back: 0,
        }
    }

    fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// One conversation's client-visible state
#[derive(Clone, Debug)]
pub struct ConversationSession {
    id: SessionId,
    messages: Vec<ChatMessage>,
    pending: Option<PendingExchange>,
    next_local_id: u64,
    metadata: SessionMetadata,
}

impl ConversationSession {
    /// Create an empty session
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            pending: None,
            next_local_id: 0,
            metadata: SessionMetadata::new(),
        }
    }

    /// Create a session pre-loaded with confirmed history
    pub fn with_history(id: impl Into<SessionId>, history: Vec<ServerMessage>) -> Self {
        let mut session = Self::new(id);
        session.messages = history.into_iter().map(ChatMessage::from).collect();
        session
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Committed messages, oldest first
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The last `count` committed messages
    #[must_use]
    pub fn recent_messages(&self, count: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Get a message by id
    #[must_use]
    pub fn get_message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// The in-flight exchange, if any
    #[must_use]
    pub fn pending(&self) -> Option<&PendingExchange> {
        self.pending.as_ref()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        match &self.pending {
            None => ExchangeState::Idle,
            Some(p) if p.received_any => ExchangeState::Streaming,
            Some(_) => ExchangeState::Sending,
        }
    }

    /// Whether no exchange is in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Session bookkeeping
    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Start an exchange by inserting the optimistic user message
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::ExchangeInFlight`] without touching any state
    /// when another exchange is pending.
    pub fn begin_exchange(&mut self, content: impl Into<String>) -> Result<MessageId, ExchangeError> {
        if self.pending.is_some() {
            return Err(ExchangeError::ExchangeInFlight);
        }

        let id = self.next_local_id();
        self.messages
            .push(ChatMessage::new(id, MessageRole::User, content));
        self.pending = Some(PendingExchange::new(id));
        self.metadata.touch();

        tracing::debug!(session_id = %self.id, message_id = %id, "Exchange started");
        Ok(id)
    }

    /// Fold a delta into the pending reply
    ///
    /// Returns false when no exchange is pending.
    pub fn append_delta(&mut self, text: &str) -> bool {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.buffer.push_str(text);
                pending.received_any = true;
                pending.deltas += 1;
                true
            }
            None => false,
        }
    }

    /// Resolve the pending exchange into a committed assistant message
    ///
    /// The reply is committed even when no delta arrived.
    pub fn commit_exchange(&mut self) -> Option<CommittedExchange> {
        let pending = self.pending.take()?;

        let assistant_id = self.next_local_id();
        let assistant = ChatMessage::new(assistant_id, MessageRole::Assistant, pending.buffer);
        self.messages.push(assistant.clone());
        self.metadata.committed += 1;
        self.metadata.touch();

        tracing::debug!(
            session_id = %self.id,
            message_id = %assistant_id,
            deltas = pending.deltas,
            "Exchange committed"
        );

        Some(CommittedExchange {
            user_message: self.get_message(&pending.user_message_id).cloned(),
            assistant_message: assistant,
            deltas: pending.deltas,
        })
    }

    /// Undo the pending exchange
    ///
    /// Removes the optimistic message by id and discards the partial reply.
    pub fn rollback_exchange(&mut self) -> Option<RolledBackExchange> {
        let pending = self.pending.take()?;
        let removed = self.remove_message(&pending.user_message_id);
        self.metadata.rolled_back += 1;
        self.metadata.touch();

        tracing::debug!(
            session_id = %self.id,
            message_id = %pending.user_message_id,
            discarded_bytes = pending.buffer.len(),
            "Exchange rolled back"
        );

        Some(RolledBackExchange {
            removed,
            discarded: pending.buffer,
        })
    }

    /// Remove a committed message by id
    pub fn remove_message(&mut self, id: &MessageId) -> Option<ChatMessage> {
        let idx = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(idx))
    }

    /// Swap the message with `id` for `replacement`, keeping its position
    ///
    /// Returns false when no message has that id.
    pub fn replace_message(&mut self, id: &MessageId, replacement: ChatMessage) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Replace the whole committed sequence with the backend's history
    ///
    /// # Errors
    ///
    /// Refused with [`ExchangeError::ExchangeInFlight`] while an exchange is
    /// pending.
    pub fn hydrate(&mut self, history: Vec<ServerMessage>) -> Result<(), ExchangeError> {
        if self.pending.is_some() {
            return Err(ExchangeError::ExchangeInFlight);
        }
        self.messages = history.into_iter().map(ChatMessage::from).collect();
        self.metadata.touch();
        Ok(())
    }

    /// Merge the backend's history into the local sequence
    ///
    /// Each provisional message is swapped, by id, for the first unclaimed
    /// server message with the same role and content. Server messages that
    /// match nothing local are appended in server order.
    ///
    /// # Errors
    ///
    /// Refused with [`ExchangeError::ExchangeInFlight`] while an exchange is
    /// pending.
    pub fn reconcile(&mut self, history: Vec<ServerMessage>) -> Result<ReconcileSummary, ExchangeError> {
        if self.pending.is_some() {
            return Err(ExchangeError::ExchangeInFlight);
        }

        let known: HashSet<MessageId> = self
            .messages
            .iter()
            .filter(|m| !m.is_provisional())
            .map(|m| m.id)
            .collect();

        let mut summary = ReconcileSummary::default();
        let mut unmatched = Vec::new();

        for server in history {
            if known.contains(&MessageId::Server(server.id)) {
                continue;
            }

            let local = self
                .messages
                .iter()
                .find(|m| m.is_provisional() && m.role == server.role && m.content == server.content)
                .map(|m| m.id);

            match local {
                Some(local_id) => {
                    self.replace_message(&local_id, server.into());
                    summary.confirmed += 1;
                }
                None => unmatched.push(server),
            }
        }

        summary.added = unmatched.len();
        self.messages
            .extend(unmatched.into_iter().map(ChatMessage::from));

        tracing::debug!(
            session_id = %self.id,
            confirmed = summary.confirmed,
            added = summary.added,
            "Reconciled with server history"
        );

        Ok(summary)
    }

    fn next_local_id(&mut self) -> MessageId {
        self.next_local_id += 1;
        MessageId::Local(self.next_local_id)
    }
}

/// State behind every [`SessionHandle`] clone
#[derive(Debug)]
struct SharedSession {
    state: Mutex<ConversationSession>,
    /// Cancelled when the last handle is dropped
    abandoned: CancellationToken,
    _abandon_on_drop: DropGuard,
}

/// Shared, lockable handle to a session
///
/// The caller owns the handle; the engine only keeps a weak reference while
/// an exchange streams, so dropping every handle abandons the session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    inner: Arc<SharedSession>,
}

impl SessionHandle {
    /// Wrap a session
    #[must_use]
    pub fn new(session: ConversationSession) -> Self {
        let abandoned = CancellationToken::new();
        Self {
            inner: Arc::new(SharedSession {
                state: Mutex::new(session),
                _abandon_on_drop: abandoned.clone().drop_guard(),
                abandoned,
            }),
        }
    }

    /// Lock the session
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        self.inner.state.lock()
    }

    /// Copy of the committed messages
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.lock().messages().to_vec()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.lock().state()
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.lock().id().clone()
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
            abandoned: self.inner.abandoned.clone(),
        }
    }
}

impl From<ConversationSession> for SessionHandle {
    fn from(session: ConversationSession) -> Self {
        Self::new(session)
    }
}

/// Non-owning reference held by a running exchange
#[derive(Clone, Debug)]
pub(crate) struct WeakSession {
    inner: Weak<SharedSession>,
    abandoned: CancellationToken,
}

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<SessionHandle> {
        self.inner.upgrade().map(|inner| SessionHandle { inner })
    }

    /// Resolves once every [`SessionHandle`] has been dropped
    pub(crate) async fn abandoned(&self) {
        self.abandoned.cancelled().await;
    }
}
