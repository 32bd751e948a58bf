//! Container sandbox for job execution
//!
//! A job runs in two container-engine steps:
//!
//! 1. [`Builder`] streams a gzipped tar of the source tree plus a generated
//!    `Dockerfile` and `entrypoint.sh` into an image build, concurrently,
//!    through a bounded pipe.
//! 2. [`Runner`] creates a memory-capped container from that image with the
//!    working directory mounted at `/data`, forwards its output line by line
//!    to the job log, and removes it on every exit path.
//!
//! The engine itself is a capability ([`ContainerEngine`]); [`DockerEngine`]
//! talks to a local Docker daemon.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod builder;
mod context;
mod docker;
mod engine;
mod runner;
mod template;

pub use builder::Builder;
pub use context::write_build_context;
pub use docker::DockerEngine;
pub use engine::{
    BuildContext, BuildEvent, BuildSpec, ContainerEngine, ContainerSpec, EventStream, Mount,
    OutputFrame, OutputStream, StreamKind,
};
pub use runner::{memory_limit, Runner};
pub use template::{
    quote, render_dockerfile, render_entrypoint, SandboxSpec, DOCKERFILE_PATH, ENTRYPOINT_PATH,
    RESERVED_PREFIX, SANDBOX_DATA_DIR, SANDBOX_TMP_DIR,
};

/// Errors raised by a container engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Docker API failure
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Anything a non-Docker engine reports
    #[error("{0}")]
    Other(String),
}

/// Errors raised while building or running a sandbox
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The image build reported an error
    #[error("Failed to build a sandbox image: {0}")]
    BuildFailed(String),

    /// The container ran but exited nonzero
    #[error("Sandbox container returns an error: {code}")]
    ExecutionFailed {
        /// Container exit status
        code: i64,
    },

    /// The job was cancelled
    #[error("Sandbox operation cancelled")]
    Cancelled,

    /// Engine call failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Walking the source tree failed
    #[error("Failed to walk the source tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
