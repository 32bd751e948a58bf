use crate::destination::{expand_dropbox_url, resolve_destination, split_destination};
use crate::{LocatorError, Result};
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// A resolved resource: its logical name, where it should land, and its bytes
pub struct FetchedObject {
    /// File name from the content-disposition hint or the last URL segment
    pub name: String,
    /// Target directory, or equal to `name` when the URI carried no destination
    pub dest: String,
    /// Response body, already decompressed when the server sent gzip
    pub body: Box<dyn Read + Send>,
}

impl FetchedObject {
    /// Whether the URI named a destination of its own
    #[must_use]
    pub fn has_explicit_dest(&self) -> bool {
        self.dest != self.name
    }

    /// Directory the object belongs in, relative paths resolved against `workdir`
    #[must_use]
    pub fn target_dir(&self, workdir: &Path) -> PathBuf {
        if self.has_explicit_dest() {
            workdir.join(&self.dest)
        } else {
            workdir.to_path_buf()
        }
    }

    /// Path the object is saved to when it is not an archive
    #[must_use]
    pub fn target_file(&self, workdir: &Path) -> PathBuf {
        self.target_dir(workdir).join(&self.name)
    }
}

impl std::fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedObject")
            .field("name", &self.name)
            .field("dest", &self.dest)
            .finish_non_exhaustive()
    }
}

/// Reader that fails once its token is cancelled
///
/// Long downloads stop at the next read after cancellation instead of
/// running to completion.
pub struct Cancellable<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> Cancellable<R> {
    /// Wrap `inner`
    pub fn new(inner: R, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("fetch cancelled"));
        }
        self.inner.read(buf)
    }
}

/// Blocking HTTP locator
#[derive(Debug, Clone)]
pub struct Locator {
    agent: ureq::Agent,
}

impl Default for Locator {
    fn default() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }
}

impl Locator {
    /// Locator with default timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator with explicit connect and read timeouts
    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .build();
        Self { agent }
    }

    /// Resolve `uri` and open its body
    ///
    /// Returns once the response headers are in; the body is read lazily
    /// and fails with an IO error after `cancel` fires.
    pub fn open(&self, uri: &str, cancel: &CancellationToken) -> Result<FetchedObject> {
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }

        let (locator, dest) = split_destination(uri)?;
        let url = expand_dropbox_url(locator);
        let parsed = url::Url::parse(&url).map_err(|source| LocatorError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LocatorError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        info!("Downloading {}", url);
        let response = match self.agent.get(&url).set("Accept-Encoding", "gzip").call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(LocatorError::Status { url, code }),
            Err(ureq::Error::Transport(transport)) => {
                return Err(LocatorError::Transport {
                    url,
                    message: transport.to_string(),
                });
            }
        };
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }

        let upstream = match response
            .header("Content-Disposition")
            .and_then(filename_from_disposition)
        {
            Some(name) => name,
            None => last_segment(response.get_url())
                .ok_or_else(|| LocatorError::NoFileName(url.clone()))?,
        };
        let (name, dest) = resolve_destination(upstream, dest);
        debug!("Resolved {} to name {} in {}", url, name, dest);

        let gzipped = response
            .header("Content-Encoding")
            .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"));
        let raw = response.into_reader();
        let body: Box<dyn Read + Send> = if gzipped {
            debug!("Response for {} is gzip encoded", url);
            Box::new(Cancellable::new(GzDecoder::new(raw), cancel.clone()))
        } else {
            Box::new(Cancellable::new(raw, cancel.clone()))
        };

        Ok(FetchedObject { name, dest, body })
    }
}

/// Extract the file name from a `Content-Disposition` header value
///
/// Accepts both `filename="a b.zip"` and bare `filename=a.zip`.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r#"filename="?([^";]+)"?"#).ok())
        .as_ref()?;

    pattern
        .captures(header)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

fn last_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}
