//! Worker configuration
//!
//! ```yaml
//! storage:
//!   type: http
//!   endpoint: https://storage.example.com/jobs
//! credentials:
//!   token_file: /var/run/jobwerk/token
//! sandbox:
//!   default_image: python:3.12
//!   stdout_dir: /tmp
//!   compression_threshold: 1048576
//! ```

use crate::script::{JobScript, DEFAULT_IMAGE};
use crate::upload::DEFAULT_COMPRESSION_THRESHOLD;
use crate::JobError;
use async_trait::async_trait;
use convenient_storage::{
    CredentialProvider, FsConnector, HttpConnector, StaticTokenProvider, StorageConnector,
    StorageError, Token, TokenFileProvider,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where objects are stored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Remote object store speaking plain HTTP PUT/DELETE
    Http {
        /// Base URL; objects live at `<endpoint>/<container>/<key>`
        endpoint: String,
    },
    /// Directory tree on the local filesystem
    Local {
        /// One subdirectory per container
        root: PathBuf,
    },
}

/// Where access tokens come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialsConfig {
    /// Fixed token
    #[serde(default)]
    pub token: Option<String>,
    /// File re-read on every refresh; wins over `token`
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_stdout_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_threshold() -> u64 {
    DEFAULT_COMPRESSION_THRESHOLD
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SandboxConfig {
    /// Replaces the built-in base image for scripts that do not pick one
    #[serde(default)]
    pub default_image: Option<String>,
    /// Host directory mounted at `/tmp` inside the sandbox
    #[serde(default = "default_stdout_dir")]
    pub stdout_dir: PathBuf,
    /// Captured stdout above this size is gzipped before upload
    #[serde(default = "default_threshold")]
    pub compression_threshold: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_image: None,
            stdout_dir: default_stdout_dir(),
            compression_threshold: default_threshold(),
        }
    }
}

/// Everything a worker needs besides the job script
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Storage backend
    pub storage: StorageConfig,
    /// Credential source
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Sandbox settings
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl WorkerConfig {
    /// Parse a configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Load a configuration file
    pub async fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JobError::Config {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_yaml(&content).map_err(|e| JobError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Token used for the first connection attempt
    pub fn initial_token(&self) -> Option<Token> {
        if let Some(path) = &self.credentials.token_file {
            match std::fs::read_to_string(path) {
                Ok(raw) if !raw.trim().is_empty() => return Some(Token::new(raw.trim())),
                Ok(_) => warn!("Token file {} is empty", path.display()),
                Err(err) => warn!("Cannot read token file {}: {}", path.display(), err),
            }
        }
        self.credentials.token.as_deref().map(Token::new)
    }

    /// Connector for the configured backend
    pub fn connector(&self) -> Arc<dyn StorageConnector> {
        match &self.storage {
            StorageConfig::Http { endpoint } => {
                debug!("Using HTTP storage at {}", endpoint);
                Arc::new(HttpConnector::new(endpoint.clone(), self.initial_token()))
            }
            StorageConfig::Local { root } => {
                debug!("Using local storage at {}", root.display());
                Arc::new(FsConnector::new(root))
            }
        }
    }

    /// Provider consulted when the store rejects the current token
    pub fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        match (&self.credentials.token_file, &self.credentials.token) {
            (Some(path), _) => Arc::new(TokenFileProvider::new(path)),
            (None, Some(token)) => Arc::new(StaticTokenProvider::new(Token::new(token.as_str()))),
            (None, None) => Arc::new(Unconfigured),
        }
    }

    /// Apply worker-wide defaults the script left open
    pub fn apply_defaults(&self, script: &mut JobScript) {
        if let Some(image) = &self.sandbox.default_image {
            if script.image == DEFAULT_IMAGE {
                script.image = image.clone();
            }
        }
    }
}

/// Refuses to refresh; used when no credential source is configured
struct Unconfigured;

#[async_trait]
impl CredentialProvider for Unconfigured {
    async fn refresh_token(&self) -> convenient_storage::Result<Token> {
        Err(StorageError::Credential("no credential source configured".into()))
    }
}
