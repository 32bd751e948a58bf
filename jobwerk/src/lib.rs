//! Jobwerk - worker-side job agent
//!
//! Runs one job end to end:
//! 1. Source acquisition (git, http(s), dropbox, local archives)
//! 2. Concurrent data file staging
//! 3. Sandbox image build (using convenient-sandbox)
//! 4. Sandbox run with output streamed to the job log
//! 5. Result upload with one credential refresh on failure
//!
//! The job log streams to the log container while the job runs, so it
//! survives the worker even when the job fails.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod acquire;
pub mod commands;
pub mod config;
pub mod context;
mod git;
pub mod pipeline;
pub mod script;
pub mod shutdown;
pub mod source;
pub mod upload;

pub use acquire::Acquirer;
pub use config::WorkerConfig;
pub use context::JobContext;
pub use pipeline::{Pipeline, RunResult};
pub use script::JobScript;
pub use source::SourceKind;
pub use upload::{upload_with_retry, ResultUploader, UploadedObject, DEFAULT_COMPRESSION_THRESHOLD};

use convenient_archive::ArchiveError;
use convenient_locator::LocatorError;
use convenient_sandbox::SandboxError;
use convenient_storage::StorageError;
use std::path::PathBuf;

/// Errors raised while materializing sources and data
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// Source is neither empty, git, http(s), dropbox nor a local file
    #[error("Unsupported source file type: {0}")]
    UnsupportedSourceType(String),

    /// Resolving or fetching a URI failed
    #[error(transparent)]
    Locator(#[from] LocatorError),

    /// Expanding an archive failed
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A git step exited unsuccessfully
    #[error("git {step} failed: {message}")]
    Git {
        /// Which git invocation
        step: &'static str,
        /// Exit status or spawn error
        message: String,
    },

    /// The job was cancelled
    #[error("Acquisition cancelled")]
    Cancelled,

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while uploading results
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The store rejected an upload
    #[error("Failed to upload {key}: {source}")]
    UploadFailed {
        /// Object key
        key: String,
        /// Storage diagnostic
        source: StorageError,
    },

    /// Connecting or refreshing credentials failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a job
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Worker configuration could not be loaded
    #[error("Cannot read config {path}: {message}")]
    Config {
        /// Config file
        path: PathBuf,
        /// Reason
        message: String,
    },

    /// Job script could not be loaded
    #[error("Cannot read script {path}: {message}")]
    Script {
        /// Script file
        path: PathBuf,
        /// Reason
        message: String,
    },

    /// Source or data acquisition failed
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// Image build failed, or the run was cancelled
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Result upload failed after the retry
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Storage could not be reached
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The job was cancelled between stages
    #[error("Job cancelled")]
    Cancelled,

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for job operations
pub type Result<T> = std::result::Result<T, JobError>;
