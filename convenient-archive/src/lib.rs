//! Archive expansion for job sources and data files
//!
//! Dispatches purely on the file name suffix:
//! - `.tar.gz` → gzip, then tar stream
//! - `.tar.xz` → xz (LZMA2), then tar stream
//! - `.zip` → zip (spooled to a temporary file first, the central directory lives at the end)
//!
//! Expansion mutates the filesystem and never rolls back. When it fails the
//! destination is left partially expanded and the caller decides what to do.
//!
//! # Example
//!
//! ```no_run
//! use convenient_archive::Expander;
//! use tokio_util::sync::CancellationToken;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let expander = Expander::new(CancellationToken::new());
//! let file = std::fs::File::open("source.tar.gz")?;
//! expander.expand("source.tar.gz", file, Path::new("work"))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod compress;
mod expander;
mod kind;

pub use compress::{gzip_copy, COMPRESSED_SUFFIX};
pub use expander::Expander;
pub use kind::ArchiveKind;

/// Errors raised while expanding an archive
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The file name carries no supported archive suffix
    #[error("File type of {0} is not supported")]
    UnsupportedFormat(String),

    /// An entry would be written outside the destination directory
    #[error("Archive entry escapes the destination directory: {0}")]
    UnsafeEntry(String),

    /// The surrounding job was cancelled between two entries
    #[error("Archive expansion cancelled")]
    Cancelled,

    /// Zip central directory or entry could not be decoded
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Reading the stream or writing the tree failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
