use std::fmt;

/// Archive format, decided by file name suffix only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `.tar.gz`
    TarGz,
    /// `.tar.xz`
    TarXz,
    /// `.zip`
    Zip,
    /// Anything else, stored verbatim by callers
    Plain,
}

impl ArchiveKind {
    /// Classify a file name (or URL path) by its suffix
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if name.ends_with(".tar.gz") {
            Self::TarGz
        } else if name.ends_with(".tar.xz") {
            Self::TarXz
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Plain
        }
    }

    /// Whether the format can be expanded into a directory
    #[must_use]
    pub fn is_archive(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TarGz => write!(f, "gzipped tarball"),
            Self::TarXz => write!(f, "xz-compressed tarball"),
            Self::Zip => write!(f, "zip file"),
            Self::Plain => write!(f, "plain file"),
        }
    }
}
