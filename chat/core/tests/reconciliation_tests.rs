//! Reconciliation integration tests
//!
//! End-to-end exchanges through `ChatEngine` over a scripted transport.
//! Tests cover:
//! - Optimistic insert, streaming, and commit
//! - Rollback on error frames and transport failures
//! - The single in-flight exchange rule
//! - Chunk-boundary independence of the whole pipeline
//! - History hydration and server reconciliation

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use persona_chat_core::streaming::StreamFrame;
use persona_chat_core::{
    ChatEngine, ChatMessage, ConversationSession, EngineConfig, ExchangeError, ExchangeObserver,
    ExchangeState, FrameDecoder, MessageId, MessageRole, ScriptedResponse, ScriptedTransport,
    ServerMessage, SessionHandle, TransportError,
};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Chunk(String),
    Complete(Vec<(MessageRole, String)>),
    Error(ExchangeError),
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Error(_)))
            .count()
    }
}

impl ExchangeObserver for Recorder {
    fn on_chunk(&mut self, text: &str) {
        self.0.lock().push(Event::Chunk(text.to_string()));
    }

    fn on_complete(&mut self, messages: &[ChatMessage]) {
        let summary = messages
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect();
        self.0.lock().push(Event::Complete(summary));
    }

    fn on_error(&mut self, error: &ExchangeError) {
        self.0.lock().push(Event::Error(error.clone()));
    }
}

fn engine() -> (ScriptedTransport, ChatEngine) {
    let transport = ScriptedTransport::new();
    let engine = ChatEngine::new(transport.clone(), EngineConfig::without_timeouts());
    (transport, engine)
}

fn session() -> SessionHandle {
    SessionHandle::new(ConversationSession::new("7"))
}

fn contents(session: &SessionHandle) -> Vec<(MessageRole, String)> {
    session
        .snapshot()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

fn server(id: i64, role: MessageRole, content: &str) -> ServerMessage {
    ServerMessage {
        id,
        chat_id: Some(7),
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    }
}

// =============================================================================
// Commit
// =============================================================================

/// "hello" with deltas "hi", " there" commits two messages in order and
/// reports both deltas before completion.
#[tokio::test]
async fn test_optimistic_then_commit() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: hi\n\ndata:  there\n\ndata: [DONE]\n\n");
    let recorder = Recorder::default();

    let report = engine
        .send_message(&session, "hello", &mut recorder.clone())
        .await
        .unwrap();

    let expected = vec![
        (MessageRole::User, "hello".to_string()),
        (MessageRole::Assistant, "hi there".to_string()),
    ];
    assert_eq!(contents(&session), expected);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Chunk("hi".into()),
            Event::Chunk(" there".into()),
            Event::Complete(expected),
        ]
    );
    assert_eq!(report.deltas, 2);
    assert!(report.assistant_message.is_provisional());
}

/// The optimistic message is visible before any byte of the reply.
#[tokio::test]
async fn test_user_message_visible_while_streaming() {
    let (transport, engine) = engine();
    let session = session();
    transport.push(ScriptedResponse::Stall(vec![]));

    let handle = engine
        .spawn_message(&session, "hello", Recorder::default())
        .unwrap();

    assert_eq!(session.state(), ExchangeState::Sending);
    assert_eq!(
        contents(&session),
        vec![(MessageRole::User, "hello".to_string())]
    );

    handle.cancel();
    assert_eq!(handle.join().await.unwrap_err(), ExchangeError::Cancelled);
}

/// An immediate `[DONE]` commits an assistant message with empty content.
#[tokio::test]
async fn test_empty_delta_commit() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: [DONE]\n\n");

    engine.send_message(&session, "hello", &mut ()).await.unwrap();

    assert_eq!(
        contents(&session),
        vec![
            (MessageRole::User, "hello".to_string()),
            (MessageRole::Assistant, String::new()),
        ]
    );
}

/// Frames after `[DONE]` never reach the session.
#[tokio::test]
async fn test_sentinel_precedence() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: a\n\ndata: [DONE]\n\ndata: b\n\n");
    let recorder = Recorder::default();

    engine
        .send_message(&session, "hello", &mut recorder.clone())
        .await
        .unwrap();

    assert_eq!(session.snapshot()[1].content, "a");
    assert_eq!(recorder.events()[0], Event::Chunk("a".into()));
    assert_eq!(recorder.events().len(), 2);
}

/// A body that ends without `[DONE]` still commits.
#[tokio::test]
async fn test_implicit_completion() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: a\n\ndata: b\n\n");

    engine.send_message(&session, "hello", &mut ()).await.unwrap();

    assert_eq!(session.snapshot()[1].content, "ab");
    assert_eq!(session.state(), ExchangeState::Idle);
}

// =============================================================================
// Rollback
// =============================================================================

/// An error frame after a delta rolls back, discards the partial reply,
/// and reports the server's message exactly once.
#[tokio::test]
async fn test_rollback_on_error_frame() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: partial\n\ndata: [ERROR] server busy\n\n");
    let recorder = Recorder::default();

    let err = engine
        .send_message(&session, "hello", &mut recorder.clone())
        .await
        .unwrap_err();

    assert_eq!(err, ExchangeError::Protocol("server busy".into()));
    assert_eq!(err.user_detail(), "server busy");
    assert!(session.snapshot().is_empty());
    assert!(session.lock().pending().is_none());
    assert_eq!(recorder.errors(), 1);
    assert!(recorder
        .events()
        .iter()
        .all(|e| !matches!(e, Event::Complete(_))));
}

/// Rollback restores exactly the pre-send sequence, including earlier turns.
#[tokio::test]
async fn test_rollback_restores_previous_sequence() {
    let (transport, engine) = engine();
    let session = session();
    transport.push_body("data: first reply\ndata: [DONE]\n");
    engine.send_message(&session, "first", &mut ()).await.unwrap();
    let before = session.snapshot();

    transport.push_failure(TransportError::Status {
        status: 500,
        detail: "Internal error".into(),
    });
    let err = engine
        .send_message(&session, "second", &mut ())
        .await
        .unwrap_err();

    assert_eq!(err.user_detail(), "Internal error");
    assert_eq!(session.snapshot(), before);
}

/// A read error mid-body rolls back with the transport error.
#[tokio::test]
async fn test_rollback_on_body_failure() {
    let (transport, engine) = engine();
    let session = session();
    transport.push(ScriptedResponse::Chunks(vec![
        Ok(b"data: par".to_vec()),
        Err(TransportError::Body("connection reset".into())),
    ]));
    let recorder = Recorder::default();

    let err = engine
        .send_message(&session, "hello", &mut recorder.clone())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExchangeError::Transport(TransportError::Body("connection reset".into()))
    );
    assert!(session.snapshot().is_empty());
    assert_eq!(err.user_detail(), "connection reset");
    // The partial line never completed, so no delta was reported
    assert_eq!(recorder.events(), vec![Event::Error(err.clone())]);
}

// =============================================================================
// Single in-flight exchange
// =============================================================================

/// A second send while one is pending is rejected before any I/O and
/// leaves the pending exchange untouched.
#[tokio::test]
async fn test_single_in_flight() {
    let (transport, engine) = engine();
    let session = session();
    transport.push(ScriptedResponse::Stall(vec![b"data: x\n".to_vec()]));
    transport.push_body("data: never\n");

    let first = engine
        .spawn_message(&session, "first", Recorder::default())
        .unwrap();
    // Let the first exchange open its stream and take its delta
    tokio::task::yield_now().await;
    assert_eq!(session.state(), ExchangeState::Streaming);

    let recorder = Recorder::default();
    let second = engine
        .send_message(&session, "second", &mut recorder.clone())
        .await;

    assert_eq!(second.unwrap_err(), ExchangeError::ExchangeInFlight);
    assert!(recorder.events().is_empty());
    assert_eq!(transport.remaining(), 1);
    assert_eq!(session.snapshot().len(), 1);
    assert_eq!(session.snapshot()[0].content, "first");

    first.cancel();
    first.join().await.unwrap_err();
    assert!(session.snapshot().is_empty());
}

/// Different sessions stream independently through one engine.
#[tokio::test]
async fn test_sessions_are_independent() {
    let (transport, engine) = engine();
    let a = SessionHandle::new(ConversationSession::new("a"));
    let b = SessionHandle::new(ConversationSession::new("b"));
    transport.push_body("data: for a\ndata: [DONE]\n");
    transport.push_body("data: for b\ndata: [DONE]\n");

    let mut obs_a = ();
    let mut obs_b = ();
    let (ra, rb) = tokio::join!(
        engine.send_message(&a, "to a", &mut obs_a),
        engine.send_message(&b, "to b", &mut obs_b),
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.snapshot().len(), 2);
    assert_eq!(b.snapshot().len(), 2);
    let sent: Vec<String> = transport
        .requests()
        .into_iter()
        .map(|r| r.session_id.to_string())
        .collect();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&"a".to_string()) && sent.contains(&"b".to_string()));
}

// =============================================================================
// Chunk boundaries
// =============================================================================

/// Every split of the body yields the same frames and the same commit.
#[tokio::test]
async fn test_frame_boundary_independence() {
    let body = "data: héllo\r\n\n: keep-alive\ndata:  wörld 👋\n\ndata: [DONE]\n\n";

    let mut reference = FrameDecoder::new();
    let mut expected = reference.push(body.as_bytes());
    expected.extend(reference.finish());
    assert_eq!(
        expected,
        vec![
            StreamFrame::ContentDelta("héllo".into()),
            StreamFrame::ContentDelta(" wörld 👋".into()),
            StreamFrame::Complete,
        ]
    );

    for chunk_size in 1..=body.len() {
        let (transport, engine) = engine();
        let session = session();
        transport.push(ScriptedResponse::chunked(body, chunk_size));

        let report = engine.send_message(&session, "hi", &mut ()).await.unwrap();
        assert_eq!(
            report.assistant_message.content, "héllo wörld 👋",
            "chunk size {chunk_size}"
        );
        assert_eq!(report.deltas, 2, "chunk size {chunk_size}");
    }
}

// =============================================================================
// History and reconciliation
// =============================================================================

/// History loads before the first send; provisional ids are swapped for
/// server ids after a refresh, and unseen server messages are appended.
#[tokio::test]
async fn test_hydrate_send_reconcile() {
    let (transport, engine) = engine();
    let session = session();
    transport.set_history(vec![
        server(10, MessageRole::User, "earlier"),
        server(11, MessageRole::Assistant, "earlier reply"),
    ]);

    assert_eq!(engine.load_history(&session).await.unwrap(), 2);

    transport.push_body("data: hi\ndata: [DONE]\n");
    engine.send_message(&session, "hello", &mut ()).await.unwrap();

    transport.set_history(vec![
        server(10, MessageRole::User, "earlier"),
        server(11, MessageRole::Assistant, "earlier reply"),
        server(12, MessageRole::User, "hello"),
        server(13, MessageRole::Assistant, "hi"),
        server(14, MessageRole::Assistant, "follow-up"),
    ]);
    let summary = engine.refresh(&session).await.unwrap();

    assert_eq!(summary.confirmed, 2);
    assert_eq!(summary.added, 1);
    let ids: Vec<MessageId> = session.snapshot().iter().map(|m| m.id).collect();
    assert_eq!(ids, (10..=14).map(MessageId::Server).collect::<Vec<_>>());
    assert!(session.snapshot().iter().all(|m| !m.is_provisional()));
}

/// History calls are refused while an exchange is pending.
#[tokio::test]
async fn test_refresh_refused_while_pending() {
    let (transport, engine) = engine();
    let session = session();
    transport.push(ScriptedResponse::Stall(vec![]));

    let handle = engine
        .spawn_message(&session, "hello", Recorder::default())
        .unwrap();

    assert_eq!(
        engine.refresh(&session).await.unwrap_err(),
        ExchangeError::ExchangeInFlight
    );
    assert_eq!(
        engine.load_history(&session).await.unwrap_err(),
        ExchangeError::ExchangeInFlight
    );

    handle.cancel();
    handle.join().await.unwrap_err();
}

/// A failed history fetch surfaces the backend's detail.
#[tokio::test]
async fn test_history_failure() {
    let (transport, engine) = engine();
    let session = session();
    transport.fail_history(TransportError::Status {
        status: 404,
        detail: "Chat not found".into(),
    });

    let err = engine.load_history(&session).await.unwrap_err();
    assert_eq!(err.user_detail(), "Chat not found");
    assert!(session.snapshot().is_empty());
}
