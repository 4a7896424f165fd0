//! Stream Decoding
//!
//! Converts the body of a streaming chat response into discrete protocol
//! frames.
//!
//! # Wire Format
//!
//! ```text
//! data: Hello\n
//! \n
//! data:  there\n
//! \n
//! data: [DONE]\n
//! ```
//!
//! Each event is a line starting with `data: `. The payload `[DONE]` ends the
//! reply, a payload starting with `[ERROR]` aborts it with a message, and any
//! other payload is assistant text appended verbatim. Lines that are not
//! `data: ` lines (blank separators, `: keep-alive` comments) are skipped.
//!
//! # Chunking
//!
//! The transport delivers the body in chunks of arbitrary size.
//! [`FrameDecoder`] buffers raw bytes and only decodes text once a whole
//! line is isolated, so a chunk may end in the middle of the prefix, the
//! payload, or a multi-byte character without changing the result.
//!
//! # Example
//!
//! ```
//! use persona_chat_core::streaming::{FrameDecoder, StreamFrame};
//!
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.push(b"data: hel").is_empty());
//! assert_eq!(
//!     decoder.push(b"lo\n\ndata: [DONE]\n"),
//!     vec![StreamFrame::ContentDelta("hello".into()), StreamFrame::Complete],
//! );
//! ```

mod decoder;
mod frame;

pub use decoder::{decode_stream, FrameDecoder};
pub use frame::{classify_line, StreamFrame, DATA_PREFIX, DONE_SENTINEL, ERROR_PREFIX};
