//! Error Types
//!
//! Two layers of failure:
//!
//! - [`TransportError`]: the request could not be sent or the response could
//!   not be read.
//! - [`ExchangeError`]: why a `send_message` call did not commit. Wraps
//!   transport failures alongside protocol error frames, timeouts and the
//!   precondition violations a caller can trigger.

use thiserror::Error;

/// Fallback detail shown when no better description of a failure exists
pub const GENERIC_FAILURE_DETAIL: &str = "Failed to send message";

/// Failures below the protocol layer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be delivered (DNS, refused connection, TLS)
    #[error("connection failed: {0}")]
    Connect(String),

    /// The backend answered with a non-success status
    #[error("server returned {status}: {detail}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Human-readable detail extracted from the response body
        detail: String,
    },

    /// Reading the response body failed mid-stream
    #[error("response body read failed: {0}")]
    Body(String),

    /// A non-streaming response could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The configured endpoint is not a valid URL
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl TransportError {
    /// Whether the backend rejected the credential
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    /// The detail worth showing to a user, if the failure carried one
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } | Self::Body(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Why an exchange did not commit
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// `send_message` was called while another exchange is pending
    #[error("an exchange is already in flight for this session")]
    ExchangeInFlight,

    /// The outgoing text was rejected before anything was sent
    #[error("invalid message content: {0}")]
    InvalidContent(String),

    /// The server sent an `[ERROR]` frame
    #[error("server error: {0}")]
    Protocol(String),

    /// The request or response failed at the transport level
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The exchange exceeded its deadline or went idle for too long
    #[error("exchange timed out")]
    Timeout,

    /// The caller cancelled the exchange
    #[error("exchange cancelled")]
    Cancelled,

    /// The session was dropped while the exchange was streaming
    #[error("session was dropped before the exchange resolved")]
    SessionDropped,

    /// The frame stream ended without a terminal frame
    #[error("stream ended without a terminal frame")]
    StreamEnded,
}

impl ExchangeError {
    /// Whether the error was raised before the exchange began
    ///
    /// Such errors leave the session untouched and are not reported to the
    /// observer.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ExchangeInFlight | Self::InvalidContent(_))
    }

    /// Text suitable for display to the user
    ///
    /// Protocol messages pass through verbatim, HTTP failures show the
    /// backend's detail and body read failures their cause. Everything else
    /// falls back to a generic message.
    #[must_use]
    pub fn user_detail(&self) -> String {
        match self {
            Self::Protocol(message) => message.clone(),
            Self::Transport(err) => err
                .detail()
                .map_or_else(|| GENERIC_FAILURE_DETAIL.to_string(), str::to_string),
            Self::InvalidContent(reason) => reason.clone(),
            _ => GENERIC_FAILURE_DETAIL.to_string(),
        }
    }
}
