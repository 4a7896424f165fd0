//! Chat Transports
//!
//! The engine reaches the backend through the [`ChatTransport`] trait.
//!
//! # Implementations
//!
//! - [`HttpTransport`]: the persona chat REST backend over reqwest
//! - [`ScriptedTransport`]: canned bodies for replays and tests
//!
//! # Adding a New Transport
//!
//! 1. Implement [`ChatTransport`]
//! 2. Return the raw response body from `open_stream`; do not decode it
//! 3. Map failures to [`TransportError`](crate::error::TransportError)

pub mod auth;
pub mod http;
pub mod scripted;
pub mod traits;

pub use auth::{CredentialError, CredentialProvider, StaticCredentials, TokenFileCredentials};
pub use http::HttpTransport;
pub use scripted::{split_chunks, ScriptedResponse, ScriptedTransport};
pub use traits::{ByteStream, ChatTransport, StreamRequest};
