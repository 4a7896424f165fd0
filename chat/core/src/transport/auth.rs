//! Bearer Credentials
//!
//! Every request carries the caller's bearer token when one is available.
//! Where the token comes from (login flow, keychain, a file written by
//! another tool) is outside this crate; a [`CredentialProvider`] only hands
//! out the current value.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors loading a credential
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Failed to read the token file
    #[error("failed to read token file at {path}: {source}")]
    ReadFailed {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// The token file exists but holds no token
    #[error("token file at {0} is empty")]
    Empty(PathBuf),
}

/// Source of the bearer token attached to requests
pub trait CredentialProvider: Send + Sync {
    /// The current token, or `None` to send the request unauthenticated
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token (or none)
#[derive(Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    /// Use `token` for every request
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Send requests without an `Authorization` header
    #[must_use]
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Token read once from a file
///
/// Surrounding whitespace (a trailing newline, typically) is stripped.
#[derive(Clone)]
pub struct TokenFileCredentials {
    path: PathBuf,
    token: String,
}

impl TokenFileCredentials {
    /// Read the token at `path`
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or contains only whitespace.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|source| CredentialError::ReadFailed {
            path: path.clone(),
            source,
        })?;

        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::Empty(path));
        }

        tracing::debug!(path = ?path, "Loaded bearer token from file");
        Ok(Self { path, token })
    }

    /// Where the token was read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for TokenFileCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFileCredentials")
            .field("path", &self.path)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl CredentialProvider for TokenFileCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}
