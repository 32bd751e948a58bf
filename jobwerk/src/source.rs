//! Source URI classification

use std::path::PathBuf;

/// What a job's `source` refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// No source
    Empty,
    /// Git repository, pulled into the working directory
    GitRepository(String),
    /// http, https or dropbox resource
    Remote(String),
    /// Local file named by a `file://` URI
    LocalFile(PathBuf),
    /// Anything else
    Unsupported(String),
}

impl SourceKind {
    /// Classify `source`; the git suffix wins over the scheme
    #[must_use]
    pub fn classify(source: &str) -> Self {
        let source = source.trim();
        if source.is_empty() {
            Self::Empty
        } else if source.ends_with(".git") {
            Self::GitRepository(source.to_string())
        } else if ["http://", "https://", "dropbox://"]
            .iter()
            .any(|scheme| source.starts_with(scheme))
        {
            Self::Remote(source.to_string())
        } else if let Some(path) = source.strip_prefix("file://") {
            Self::LocalFile(PathBuf::from(path))
        } else {
            Self::Unsupported(source.to_string())
        }
    }
}
