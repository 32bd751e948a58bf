//! Resource locator for job sources and data files
//!
//! A URI may carry a destination after the last path segment, separated by a
//! colon:
//!
//! - `https://host/pkg.tar.gz` saves as `pkg.tar.gz`
//! - `https://host/pkg.tar.gz:/opt/` keeps the upstream name inside `/opt`
//! - `https://host/pkg.tar.gz:/opt/renamed.tar.gz` renames it
//!
//! `dropbox://` links are rewritten to direct-download URLs. Fetching is
//! blocking (ureq); async callers run [`Locator::open`] inside
//! `spawn_blocking`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod destination;
mod fetch;

pub use destination::{expand_dropbox_url, split_destination};
pub use fetch::{filename_from_disposition, Cancellable, FetchedObject, Locator};

/// Errors raised while resolving or fetching a URI
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    /// Scheme other than http, https or dropbox
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Destination suffix present but unusable
    #[error("Malformed destination in {0}")]
    MalformedDestination(String),

    /// URL could not be parsed after rewriting
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Parser diagnostic
        source: url::ParseError,
    },

    /// Neither a content-disposition hint nor a path segment names the object
    #[error("Cannot determine a file name for {0}")]
    NoFileName(String),

    /// Server replied with a non-success status
    #[error("Failed to fetch {url}: HTTP status {code}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        code: u16,
    },

    /// Connection, TLS or protocol failure
    #[error("Failed to fetch {url}: {message}")]
    Transport {
        /// Requested URL
        url: String,
        /// Transport diagnostic
        message: String,
    },

    /// The job was cancelled before or during the fetch
    #[error("Fetch cancelled")]
    Cancelled,

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for locator operations
pub type Result<T> = std::result::Result<T, LocatorError>;
