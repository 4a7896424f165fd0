//! Line-buffered frame decoder
//!
//! Bytes are accumulated until a full `\n`-terminated line is available; only
//! then is the line turned into text and classified. Chunk boundaries can
//! therefore fall anywhere, including inside the `data: ` prefix or inside a
//! multi-byte UTF-8 sequence.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};

use super::frame::{classify_line, StreamFrame};

/// Incremental decoder for one response body
///
/// Not reusable: once a terminal frame has been produced every later input is
/// ignored.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the current, not yet terminated line(s)
    buffer: Vec<u8>,
    /// How far into `buffer` we already know there is no `\n`
    scanned: usize,
    /// A terminal frame has been produced
    finished: bool,
    /// Total bytes accepted
    bytes_seen: usize,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        self.bytes_seen += chunk.len();
        self.buffer.extend_from_slice(chunk);

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;

            if let Some(frame) = classify_line(&line[..line.len() - 1]) {
                if self.emit(frame, &mut frames) {
                    break;
                }
            }
        }
        self.scanned = self.buffer.len();

        frames
    }

    /// Signal end of input
    ///
    /// An unterminated trailing line is classified as if it had been
    /// terminated. If no terminal frame was seen, a `Complete` is synthesized
    /// so callers always observe one.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            if let Some(frame) = classify_line(&line) {
                if self.emit(frame, &mut frames) {
                    return frames;
                }
            }
        }

        tracing::debug!(bytes = self.bytes_seen, "Stream ended without [DONE], completing implicitly");
        self.finished = true;
        frames.push(StreamFrame::Complete);
        frames
    }

    /// Whether a terminal frame has been produced
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes waiting for a line delimiter
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes accepted so far
    #[must_use]
    pub fn bytes_seen(&self) -> usize {
        self.bytes_seen
    }

    /// Returns true when `frame` ended the stream.
    fn emit(&mut self, frame: StreamFrame, frames: &mut Vec<StreamFrame>) -> bool {
        let terminal = frame.is_terminal();
        frames.push(frame);
        if terminal {
            self.finished = true;
            self.buffer.clear();
            self.scanned = 0;
        }
        terminal
    }
}

struct DecodeState<S> {
    chunks: S,
    decoder: FrameDecoder,
    ready: VecDeque<StreamFrame>,
    done: bool,
}

/// Turn a stream of byte chunks into a lazy stream of frames
///
/// Frames come out in arrival order. The sequence ends after the first
/// terminal frame (no further chunks are read), or after a read error,
/// which is passed through as the last item. A clean end of input without
/// `[DONE]` yields a synthesized `Complete`.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<StreamFrame, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        chunks,
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.push(chunk.as_ref()));
                    state.done = state.decoder.is_finished();
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.ready.extend(state.decoder.finish());
                    state.done = true;
                }
            }
        }
    })
}
