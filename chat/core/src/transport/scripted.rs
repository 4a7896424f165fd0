//! Scripted Transport
//!
//! Plays back canned response bodies instead of talking to a backend. Used
//! for offline replay of recorded streams and throughout the tests.
//!
//! Each `open_stream` call consumes the next queued [`ScriptedResponse`].
//! When the queue is empty, the replay body (if one was set) is served
//! again; otherwise the call fails with a connect error.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::traits::{ByteStream, ChatTransport, StreamRequest};
use crate::error::TransportError;
use crate::messages::{ServerMessage, SessionId};

/// One canned reply
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    /// Deliver these chunks, then end the body
    Chunks(Vec<Result<Vec<u8>, TransportError>>),
    /// Deliver these chunks, then never produce anything again
    Stall(Vec<Vec<u8>>),
    /// Fail before any body is produced
    Fail(TransportError),
}

impl ScriptedResponse {
    /// A body delivered as a single chunk
    pub fn body(body: impl AsRef<[u8]>) -> Self {
        Self::Chunks(vec![Ok(body.as_ref().to_vec())])
    }

    /// A body split into chunks of at most `chunk_size` bytes
    pub fn chunked(body: impl AsRef<[u8]>, chunk_size: usize) -> Self {
        Self::Chunks(
            split_chunks(body.as_ref(), chunk_size)
                .into_iter()
                .map(Ok)
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    replay: Option<ScriptedResponse>,
    history: Vec<ServerMessage>,
    history_error: Option<TransportError>,
    requests: Vec<StreamRequest>,
}

/// Transport that serves queued responses
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Create a transport with nothing queued
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for every request, split into `chunk_size` byte chunks
    #[must_use]
    pub fn replaying(body: impl AsRef<[u8]>, chunk_size: usize) -> Self {
        let transport = Self::new();
        transport.script.lock().replay = Some(ScriptedResponse::chunked(body, chunk_size));
        transport
    }

    /// Wait this long before delivering each chunk
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// History returned by `fetch_history`
    #[must_use]
    pub fn with_history(self, history: Vec<ServerMessage>) -> Self {
        self.set_history(history);
        self
    }

    /// Queue a response
    pub fn push(&self, response: ScriptedResponse) {
        self.script.lock().responses.push_back(response);
    }

    /// Queue a body delivered in one chunk
    pub fn push_body(&self, body: impl AsRef<[u8]>) {
        self.push(ScriptedResponse::body(body));
    }

    /// Queue a failure to open the stream
    pub fn push_failure(&self, error: TransportError) {
        self.push(ScriptedResponse::Fail(error));
    }

    /// Replace the history returned by `fetch_history`
    pub fn set_history(&self, history: Vec<ServerMessage>) {
        let mut script = self.script.lock();
        script.history = history;
        script.history_error = None;
    }

    /// Make `fetch_history` fail with `error`
    pub fn fail_history(&self, error: TransportError) {
        self.script.lock().history_error = Some(error);
    }

    /// Every request received so far, oldest first
    #[must_use]
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.script.lock().requests.clone()
    }

    /// Number of queued responses not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().responses.len()
    }

    fn next_response(&self, request: &StreamRequest) -> Option<ScriptedResponse> {
        let mut script = self.script.lock();
        script.requests.push(request.clone());
        script
            .responses
            .pop_front()
            .or_else(|| script.replay.clone())
    }

    fn body_stream<S>(&self, chunks: S) -> ByteStream
    where
        S: futures::Stream<Item = Result<Vec<u8>, TransportError>> + Send + 'static,
    {
        match self.chunk_delay {
            Some(delay) => chunks
                .then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    chunk
                })
                .boxed(),
            None => chunks.boxed(),
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let response = self.next_response(request).ok_or_else(|| {
            TransportError::Connect("no scripted response queued".to_string())
        })?;

        match response {
            ScriptedResponse::Fail(error) => Err(error),
            ScriptedResponse::Chunks(chunks) => Ok(self.body_stream(stream::iter(chunks))),
            ScriptedResponse::Stall(chunks) => {
                let head = stream::iter(chunks.into_iter().map(Ok));
                Ok(self.body_stream(head.chain(stream::pending())))
            }
        }
    }

    async fn fetch_history(
        &self,
        _session_id: &SessionId,
    ) -> Result<Vec<ServerMessage>, TransportError> {
        let script = self.script.lock();
        match &script.history_error {
            Some(error) => Err(error.clone()),
            None => Ok(script.history.clone()),
        }
    }
}

/// Split `body` into chunks of at most `chunk_size` bytes (minimum 1)
#[must_use]
pub fn split_chunks(body: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    body.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect()
}
