//! Result upload
//!
//! Captured stdout files and the files matched by the script's `upload`
//! patterns go to the result container under `<job name>/`. Every file is
//! uploaded by its own task; all tasks run to completion before the first
//! error is reported, so whatever could be stored is stored.

use crate::context::JobContext;
use crate::script::JobScript;
use crate::UploadError;
use convenient_archive::{gzip_copy, COMPRESSED_SUFFIX};
use convenient_storage::{
    Container, CredentialProvider, ObjectBody, ObjectStore, StorageConnector,
};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

/// Captured stdout larger than this is gzipped before upload
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 1024 * 1024;

const PIPE_CAPACITY: usize = 64 * 1024;

/// One stored result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// Key within the result container
    pub key: String,
    /// Where the store says the object lives
    pub url: String,
}

/// Uploads a finished job's results
#[derive(Clone)]
pub struct ResultUploader {
    ctx: JobContext,
    store: Arc<dyn ObjectStore>,
    compression_threshold: u64,
}

impl ResultUploader {
    /// Uploader using the default compression threshold
    pub fn new(ctx: JobContext, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            ctx,
            store,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// Compress captured stdout strictly larger than `threshold` bytes
    #[must_use]
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Upload captured stdout for every `run` entry and every `upload` match
    ///
    /// Missing stdout files are logged and skipped.
    pub async fn upload_results(&self, script: &JobScript) -> Result<Vec<UploadedObject>, UploadError> {
        self.ctx.log.line("Uploading result files");
        let mut tasks = JoinSet::new();

        for index in 0..script.run.len() {
            let file_name = format!("stdout{index}.txt");
            let path = self.ctx.stdout_dir.join(&file_name);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    self.ctx.log.line(format!("Cannot find {file_name}"));
                    continue;
                }
            };
            self.ctx.log.line(format!("Uploading {file_name}"));

            let store = self.store.clone();
            let log = self.ctx.log.clone();
            let key = format!("{}/{}", script.name, file_name);
            if size > self.compression_threshold {
                let _ = tasks.spawn(async move {
                    let key = format!("{key}{COMPRESSED_SUFFIX}");
                    let object = put_compressed(store.as_ref(), &path, key).await?;
                    log.line(format!("{} is uploaded to {}", file_name, object.url));
                    Ok::<_, UploadError>(object)
                });
            } else {
                let _ = tasks.spawn(async move {
                    let object = put_file(store.as_ref(), &path, key, "text/plain").await?;
                    log.line(format!("{} is uploaded to {}", file_name, object.url));
                    Ok::<_, UploadError>(object)
                });
            }
        }

        for pattern in &script.upload {
            for path in self.expand_pattern(pattern) {
                let Ok(relative) = path.strip_prefix(&self.ctx.workdir) else {
                    continue;
                };
                let relative = relative.to_string_lossy().into_owned();
                self.ctx.log.line(format!("Uploading {relative}"));

                let store = self.store.clone();
                let log = self.ctx.log.clone();
                let key = format!("{}/{}", script.name, relative);
                let _ = tasks.spawn(async move {
                    let object = put_file(store.as_ref(), &path, key, "application/octet-stream").await?;
                    log.line(format!("{} is uploaded to {}", relative, object.url));
                    Ok::<_, UploadError>(object)
                });
            }
        }

        let mut uploaded = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(UploadError::Io(io::Error::other(e))));
            match result {
                Ok(object) => uploaded.push(object),
                Err(err) => {
                    self.ctx.log.line(format!("* {err}"));
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            self.ctx.log.line("Failed to upload result files");
            return Err(err);
        }
        self.ctx.log.line("Finished uploading result files");
        uploaded.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(uploaded)
    }

    /// Regular files matching `pattern` below the working directory
    ///
    /// A malformed pattern matches nothing; it is reported in the job log.
    fn expand_pattern(&self, pattern: &str) -> Vec<PathBuf> {
        let root = glob::Pattern::escape(&self.ctx.workdir.to_string_lossy());
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern.trim_start_matches('/'));
        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(err) => {
                self.ctx.log.line(format!("* Invalid upload pattern {pattern}: {}", err.msg));
                return Vec::new();
            }
        };
        let mut matches = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => matches.push(path),
                Ok(path) => debug!("Skipping non-file match {}", path.display()),
                Err(err) => warn!("Cannot read upload match: {}", err),
            }
        }
        if matches.is_empty() {
            self.ctx.log.line(format!("No files match {pattern}"));
        }
        matches
    }
}

async fn put_file(
    store: &dyn ObjectStore,
    path: &Path,
    key: String,
    content_type: &str,
) -> Result<UploadedObject, UploadError> {
    let file = tokio::fs::File::open(path).await?;
    let body: ObjectBody = Box::new(file);
    match store.put(Container::Result, &key, body, content_type).await {
        Ok(url) => Ok(UploadedObject { key, url }),
        Err(source) => Err(UploadError::UploadFailed { key, source }),
    }
}

/// Gzip `path` on a blocking thread while the store consumes the stream
async fn put_compressed(store: &dyn ObjectStore, path: &Path, key: String) -> Result<UploadedObject, UploadError> {
    let file = std::fs::File::open(path)?;
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let bridge = SyncIoBridge::new(writer);

    let compress = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut bridge = gzip_copy(BufReader::new(file), bridge)?;
        bridge.shutdown()
    });
    let put = store.put(Container::Result, &key, Box::new(reader), "application/gzip");

    let (compressed, stored) = tokio::join!(compress, put);
    let url = stored.map_err(|source| UploadError::UploadFailed {
        key: key.clone(),
        source,
    })?;
    compressed.map_err(io::Error::other)??;
    Ok(UploadedObject { key, url })
}

/// Upload results, refreshing the credential and retrying exactly once on failure
///
/// The retry reconnects through `connector` with the refreshed token and
/// reruns the whole upload phase; a second failure is returned as is.
pub async fn upload_with_retry(
    ctx: &JobContext,
    connector: &dyn StorageConnector,
    credentials: &dyn CredentialProvider,
    store: Arc<dyn ObjectStore>,
    script: &JobScript,
    threshold: u64,
) -> Result<Vec<UploadedObject>, UploadError> {
    let first = ResultUploader::new(ctx.clone(), store)
        .with_threshold(threshold)
        .upload_results(script)
        .await;
    let err = match first {
        Ok(uploaded) => return Ok(uploaded),
        Err(err) => err,
    };

    ctx.log.line(format!("* Upload failed ({err}); refreshing the access token and retrying"));
    let token = credentials.refresh_token().await?;
    let store = connector.connect(Some(&token)).await?;
    ResultUploader::new(ctx.clone(), store)
        .with_threshold(threshold)
        .upload_results(script)
        .await
}
