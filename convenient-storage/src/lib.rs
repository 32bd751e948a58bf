//! Durable storage for job logs and results
//!
//! The object store is consumed as a capability: `put` a stream under a
//! container and key, `delete` a key. Two implementations ship here, an HTTP
//! store speaking plain PUT/DELETE with bearer tokens and a local filesystem
//! store for single-host workers and tests.
//!
//! On top of the store sit the streaming [`LogWriter`], which uploads bytes
//! as they are written, and the [`JobLog`], a cloneable handle that
//! serializes log lines from many tasks into one sink.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

mod credentials;
mod fs_store;
mod http_store;
mod job_log;
mod lines;
mod log_writer;
mod store;

pub use credentials::{CredentialProvider, StaticTokenProvider, Token, TokenFileProvider};
pub use fs_store::{FsConnector, FsObjectStore};
pub use http_store::{HttpConnector, HttpObjectStore};
pub use job_log::{DEFAULT_LOG_CAPACITY, JobLog, JobLogHandle};
pub use lines::{fragments, LineSplitter};
pub use log_writer::{DebugSink, LogWriter};
pub use store::{Container, ObjectBody, ObjectStore, StorageConnector};

/// Errors raised by storage backends and credential providers
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store rejected the credential
    #[error("Access denied for {0}")]
    Unauthorized(String),

    /// The store answered with an unexpected status
    #[error("Storage server returned {status} for {key}")]
    Server {
        /// Object key
        key: String,
        /// HTTP status code
        status: u16,
    },

    /// Object key would leave its container
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Endpoint URL is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Token could not be obtained
    #[error("Credential error: {0}")]
    Credential(String),

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
