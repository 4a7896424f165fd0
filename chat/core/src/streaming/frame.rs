//! Frame classification
//!
//! Maps one isolated line of the event stream to a [`StreamFrame`].

/// Prefix that marks an event line
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Payload that ends the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Payload prefix that carries a server-side failure
pub const ERROR_PREFIX: &str = "[ERROR]";

/// One decoded protocol event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    /// Assistant text to append (may be empty)
    ContentDelta(String),
    /// The reply is finished
    Complete,
    /// The server aborted the reply with this message
    Error(String),
}

impl StreamFrame {
    /// Whether no frames follow this one
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ContentDelta(_))
    }
}

/// Classify a single line (without its `\n`)
///
/// Returns `None` for anything that is not a `data: ` line. A trailing `\r`
/// is dropped first so CRLF-framed streams decode the same way.
#[must_use]
pub fn classify_line(line: &[u8]) -> Option<StreamFrame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = String::from_utf8_lossy(payload);

    if payload == DONE_SENTINEL {
        return Some(StreamFrame::Complete);
    }

    if let Some(rest) = payload.strip_prefix(ERROR_PREFIX) {
        return Some(StreamFrame::Error(strip_delimiter(rest).to_string()));
    }

    Some(StreamFrame::ContentDelta(payload.into_owned()))
}

/// Drop the single delimiter character between `[ERROR]` and its message.
fn strip_delimiter(rest: &str) -> &str {
    match rest.chars().next() {
        Some(c) if c.is_ascii_whitespace() || c == ':' => &rest[c.len_utf8()..],
        _ => rest,
    }
}
