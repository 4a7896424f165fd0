//! Persona Chat - Terminal Client
//!
//! Line-oriented client for a persona chat conversation. Each line typed on
//! stdin is sent as a message; the reply streams to stdout as it arrives.
//!
//! # Usage
//!
//! ```bash
//! # Talk in chat 42 on the default backend
//! persona-chat --chat-id 42
//!
//! # Different backend, explicit token
//! persona-chat --chat-id 42 --api-url https://chat.example.com --token "$TOKEN"
//!
//! # Replay a recorded event-stream body for every message, offline
//! echo hello | persona-chat --replay reply.txt
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug persona-chat --chat-id 42
//! ```
//!
//! # Signals
//!
//! - `SIGINT` during a reply: cancel it (the message is rolled back)
//! - `SIGINT` at the prompt, or EOF: exit

mod terminal;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use persona_chat_core::{
    config::{default_config_path, load_config_from_path, ClientConfig, ConfigOverrides},
    ChatEngine, ChatTransport, ConversationSession, HttpTransport, ScriptedTransport,
    SessionHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use terminal::{render_message, TerminalObserver};

/// Session id used when replaying without a chat
const REPLAY_SESSION: &str = "replay";

/// Persona Chat - stream a conversation with an AI persona
#[derive(Parser, Debug)]
#[command(name = "persona-chat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Chat to send messages to
    #[arg(short = 'i', long, env = "PERSONA_CHAT_ID", required_unless_present = "replay")]
    chat_id: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "PERSONA_CHAT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend API root (overrides config and environment)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Bearer token (overrides config and environment)
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PERSONA_CHAT_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Do not print the chat's history on start
    #[arg(long)]
    no_history: bool,

    /// Serve this recorded response body instead of calling the backend
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Chunk size used to split the replayed body
    #[arg(long, default_value_t = 16, value_name = "BYTES")]
    replay_chunk_size: usize,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.api_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(ref token) = self.token {
            overrides = overrides.with_token(token.clone());
        }
        overrides
    }

    fn session_id(&self) -> String {
        self.chat_id
            .clone()
            .unwrap_or_else(|| REPLAY_SESSION.to_string())
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout carries only the conversation.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "persona_chat={level},persona_chat_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(source = %config.source(), base_url = %config.server.base_url, "Configuration resolved");
    Ok(config)
}

/// Read a recorded response body
async fn load_replay(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read replay file: {path:?}"))
}

/// Build the transport the engine talks through
async fn build_transport(args: &Args, config: &ClientConfig) -> Result<Arc<dyn ChatTransport>> {
    if let Some(ref path) = args.replay {
        let body = load_replay(path).await?;
        info!(path = ?path, bytes = body.len(), "Replaying recorded body");
        return Ok(Arc::new(ScriptedTransport::replaying(
            body,
            args.replay_chunk_size,
        )));
    }

    let credentials = config
        .auth
        .credentials()
        .context("Failed to load bearer token")?;
    let transport = HttpTransport::with_connect_timeout(
        &config.server.base_url,
        config.server.connect_timeout,
        credentials,
    )
    .context("Failed to create HTTP transport")?;
    Ok(Arc::new(transport))
}

fn prompt() {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(b"> ");
    let _ = out.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    let transport = build_transport(&args, &config).await?;
    let engine = ChatEngine::from_shared(transport, config.engine.clone());
    let session = SessionHandle::new(ConversationSession::new(args.session_id()));

    if args.replay.is_none() {
        let loaded = engine
            .load_history(&session)
            .await
            .with_context(|| format!("Failed to load chat {}", args.session_id()))?;
        if !args.no_history {
            for message in session.snapshot() {
                println!("{}", render_message(&message));
            }
        }
        info!(messages = loaded, "History loaded");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let mut observer = TerminalObserver::new(std::io::stdout());
        let exchange =
            engine.send_message_with_cancel(&session, text, &mut observer, cancel.clone());
        tokio::pin!(exchange);

        let result = tokio::select! {
            result = &mut exchange => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                (&mut exchange).await
            }
        };

        match result {
            Ok(report) => {
                info!(
                    exchange_id = %report.exchange_id,
                    deltas = report.deltas,
                    duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                    "Reply committed"
                );
                if let Err(e) = engine.refresh(&session).await {
                    warn!(error = %e, "Failed to reconcile with the backend");
                }
            }
            Err(e) => eprintln!("error: {}", e.user_detail()),
        }
    }

    info!("Exiting");
    Ok(())
}
