//! Chat Transport Traits
//!
//! The engine never talks HTTP directly. It asks a [`ChatTransport`] to open a
//! streaming request and receives the raw response body as a stream of byte
//! chunks; decoding those chunks is the engine's job. This keeps chunk
//! boundaries an implementation detail of the transport and lets tests and
//! replays substitute scripted bodies.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::TransportError;
use crate::messages::{ServerMessage, SessionId};

/// Raw response body, chunked however the transport delivers it
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// One outgoing message
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    /// Conversation the message belongs to
    #[serde(skip)]
    pub session_id: SessionId,
    /// The user's text
    pub content: String,
}

impl StreamRequest {
    /// Create a request
    pub fn new(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            session_id,
            content: content.into(),
        }
    }
}

/// Chat backend transport
///
/// Implement this trait to connect the engine to a backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name for logs (e.g., "http", "scripted")
    fn name(&self) -> &str;

    /// Send `request` and return the streaming response body
    ///
    /// Resolves once the response headers are available. A non-success
    /// status is an error here, not an empty body.
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;

    /// Fetch the backend's confirmed history for a conversation, oldest first
    async fn fetch_history(&self, session_id: &SessionId)
        -> Result<Vec<ServerMessage>, TransportError>;
}
