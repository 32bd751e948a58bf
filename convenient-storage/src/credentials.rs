use crate::{Result, StorageError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Opaque access token
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wrap a raw token
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw token, for request headers
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Produces a fresh token after the store rejected the current one
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a new token
    async fn refresh_token(&self) -> Result<Token>;
}

/// Reads the token from a file on every refresh
///
/// An external agent (sidecar, cron job) keeps the file current; re-reading
/// it picks up whatever it last wrote.
#[derive(Debug, Clone)]
pub struct TokenFileProvider {
    path: PathBuf,
}

impl TokenFileProvider {
    /// Provider backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for TokenFileProvider {
    async fn refresh_token(&self) -> Result<Token> {
        debug!("Refreshing token from {}", self.path.display());
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StorageError::Credential(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(StorageError::Credential(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(Token::new(token))
    }
}

/// Always hands out the same token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(Token);

impl StaticTokenProvider {
    /// Provider returning `token`
    pub fn new(token: Token) -> Self {
        Self(token)
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn refresh_token(&self) -> Result<Token> {
        Ok(self.0.clone())
    }
}
