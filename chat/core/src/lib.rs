//! Persona Chat Core - Streaming Chat Client Engine
//!
//! This crate provides the client side of the persona chat streaming
//! protocol: it decodes the `data: ` line stream a reply arrives in, keeps
//! an optimistic local copy of the conversation, and commits or rolls back
//! each exchange when the stream resolves. It has no UI dependencies; a
//! terminal client, a GUI, or a test harness can drive it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Caller / UI                            │
//! │     send_message(text)            on_chunk / on_complete     │
//! └──────────────┬───────────────────────────────▲───────────────┘
//!                │                               │
//! ┌──────────────┼───────────────────────────────┼───────────────┐
//! │              ▼          ChatEngine           │               │
//! │  ┌──────────────────┐   ┌──────────────┐   ┌─┴────────────┐  │
//! │  │ ConversationSess │◀──│ frame loop   │◀──│ FrameDecoder │  │
//! │  │ (optimistic msgs)│   │ commit/undo  │   │ (streaming)  │  │
//! │  └──────────────────┘   └──────────────┘   └──────▲───────┘  │
//! └───────────────────────────────────────────────────┼──────────┘
//!                                                     │ bytes
//! ┌───────────────────────────────────────────────────┼──────────┐
//! │      ChatTransport (HttpTransport / ScriptedTransport)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatEngine`]: runs exchanges against a transport
//! - [`SessionHandle`]: shared handle to a [`ConversationSession`]
//! - [`StreamFrame`]: one decoded protocol event
//! - [`ExchangeObserver`]: receives deltas and the outcome
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use persona_chat_core::{
//!     ChatEngine, ConversationSession, EngineConfig, ExchangeCallbacks, HttpTransport,
//!     SessionHandle, StaticCredentials,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(
//!     "http://localhost:8000",
//!     Arc::new(StaticCredentials::new("token")),
//! )?;
//! let engine = ChatEngine::new(transport, EngineConfig::default());
//! let session = SessionHandle::new(ConversationSession::new("42"));
//!
//! engine.load_history(&session).await?;
//!
//! let mut observer = ExchangeCallbacks::new().with_chunk(|text| print!("{text}"));
//! let report = engine.send_message(&session, "hello", &mut observer).await?;
//! println!("\n({} deltas)", report.deltas);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Overview
//!
//! - [`streaming`]: byte chunks to [`StreamFrame`]s
//! - [`session`]: committed messages and the pending exchange
//! - [`engine`]: the exchange state machine
//! - [`transport`]: HTTP and scripted transports, credentials
//! - [`messages`]: message and identifier types
//! - [`config`]: TOML/environment configuration
//! - [`error`]: error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod session;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use engine::{
    ChatEngine, EngineConfig, ExchangeCallbacks, ExchangeHandle, ExchangeObserver, ExchangeReport,
};
pub use error::{ExchangeError, TransportError, GENERIC_FAILURE_DETAIL};
pub use messages::{ChatDetail, ChatMessage, MessageId, MessageRole, ServerMessage, SessionId};
pub use session::{
    CommittedExchange, ConversationSession, ExchangeState, PendingExchange, ReconcileSummary,
    RolledBackExchange, SessionHandle, SessionMetadata,
};

// Streaming exports
pub use streaming::{decode_stream, FrameDecoder, StreamFrame};

// Transport exports
pub use transport::{
    ByteStream, ChatTransport, CredentialError, CredentialProvider, HttpTransport,
    ScriptedResponse, ScriptedTransport, StaticCredentials, StreamRequest, TokenFileCredentials,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, AuthConfig, ClientConfig,
    ConfigError, ConfigOverrides, ConfigSource, ServerConfig,
};
