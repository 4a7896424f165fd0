//! Terminal rendering
//!
//! Streams deltas straight to the terminal as they arrive and prints
//! committed history with a role prefix.

use std::io::Write;

use persona_chat_core::{ChatMessage, ExchangeError, ExchangeObserver, MessageRole};

/// Appended to a partial reply that was rolled back
pub const DISCARDED_MARKER: &str = " [discarded]";

/// Prefix for a role's lines
pub fn role_prefix(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "you> ",
        MessageRole::Assistant => "persona> ",
    }
}

/// One committed message as a display line
pub fn render_message(message: &ChatMessage) -> String {
    format!("{}{}", role_prefix(message.role), message.content)
}

/// Writes a reply to `out` while it streams
///
/// Write errors are ignored; a closed stdout must not abort the exchange.
pub struct TerminalObserver<W: Write> {
    out: W,
    started: bool,
}

impl<W: Write> TerminalObserver<W> {
    /// Render into `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: false,
        }
    }

    /// Recover the writer
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn finish_line(&mut self) {
        if self.started {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.started = false;
        }
    }
}

impl<W: Write> ExchangeObserver for TerminalObserver<W> {
    fn on_chunk(&mut self, text: &str) {
        if !self.started {
            let _ = self.out.write_all(role_prefix(MessageRole::Assistant).as_bytes());
            self.started = true;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn on_complete(&mut self, messages: &[ChatMessage]) {
        // An empty reply streamed nothing; still show that it arrived
        if !self.started {
            if let Some(reply) = messages.last() {
                let _ = writeln!(self.out, "{}", render_message(reply));
            }
        }
        self.finish_line();
    }

    fn on_error(&mut self, _error: &ExchangeError) {
        // The partial reply is gone from the session; say so on screen
        if self.started {
            let _ = self.out.write_all(DISCARDED_MARKER.as_bytes());
        }
        self.finish_line();
    }
}
