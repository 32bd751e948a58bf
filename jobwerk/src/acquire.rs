//! Source and data acquisition
//!
//! Sources and data files share one resolution path: remote objects are
//! expanded when they carry an archive suffix and saved verbatim otherwise;
//! local archives are expanded in place and other local files are linked
//! into the working directory.

use crate::context::JobContext;
use crate::git;
use crate::source::SourceKind;
use crate::AcquireError;
use convenient_archive::{ArchiveKind, Expander};
use convenient_locator::Locator;
use std::fs;
use std::io;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Materializes a job's source and data in its working directory
#[derive(Debug, Clone)]
pub struct Acquirer {
    ctx: JobContext,
    locator: Locator,
}

impl Acquirer {
    /// Acquirer with a default locator
    pub fn new(ctx: JobContext) -> Self {
        Self::with_locator(ctx, Locator::new())
    }

    /// Acquirer using `locator` for remote objects
    pub fn with_locator(ctx: JobContext, locator: Locator) -> Self {
        Self { ctx, locator }
    }

    /// Bring the job's source into the working directory
    ///
    /// # Errors
    ///
    /// `UnsupportedSourceType` for unknown schemes; any git, fetch or
    /// expansion failure otherwise.
    pub async fn prepare_source(&self, source: &str) -> Result<(), AcquireError> {
        match SourceKind::classify(source) {
            SourceKind::Empty => {
                debug!("No source given");
                Ok(())
            }
            SourceKind::GitRepository(url) => {
                self.ctx.log.line(format!("Cloning the source repository {url}"));
                git::pull_repository(&self.ctx, &url).await?;
                self.ctx.log.line("Finished cloning the source repository");
                Ok(())
            }
            SourceKind::Remote(uri) => {
                self.ctx.log.line(format!("Downloading the source code {uri}"));
                fetch_into(&self.ctx, &self.locator, uri).await?;
                self.ctx.log.line("Finished downloading the source code");
                Ok(())
            }
            SourceKind::LocalFile(path) => link_or_expand(&self.ctx, path).await,
            SourceKind::Unsupported(other) => Err(AcquireError::UnsupportedSourceType(other)),
        }
    }

    /// Fetch every data file concurrently
    ///
    /// All entries run as sibling tasks under one child token. The first
    /// failure cancels the others; once they have all stopped, that first
    /// error is returned.
    pub async fn download_data_files(&self, data: &[String]) -> Result<(), AcquireError> {
        if data.is_empty() {
            return Ok(());
        }

        let group = self.ctx.child();
        let mut tasks = JoinSet::new();
        for uri in data {
            let ctx = group.clone();
            let locator = self.locator.clone();
            let uri = uri.clone();
            let _ = tasks.spawn(async move { fetch_data_file(&ctx, &locator, uri).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(AcquireError::Io(io::Error::other(e))));
            if let Err(err) = result {
                if first_error.is_none() {
                    debug!("Data file failed, cancelling the others: {}", err);
                    group.cancel.cancel();
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn fetch_data_file(ctx: &JobContext, locator: &Locator, uri: String) -> Result<(), AcquireError> {
    ctx.log.line(format!("Downloading data file {uri}"));
    match SourceKind::classify(&uri) {
        SourceKind::Remote(remote) => fetch_into(ctx, locator, remote).await?,
        SourceKind::LocalFile(path) => link_or_expand(ctx, path).await?,
        _ => return Err(AcquireError::UnsupportedSourceType(uri)),
    }
    ctx.log.line(format!("Finished downloading data file {uri}"));
    Ok(())
}

/// Resolve `uri` and expand or save it below the working directory
async fn fetch_into(ctx: &JobContext, locator: &Locator, uri: String) -> Result<(), AcquireError> {
    let locator = locator.clone();
    let cancel = ctx.cancel.clone();
    let workdir = ctx.workdir.clone();

    let result = run_blocking(&ctx.cancel, move || {
        let object = locator.open(&uri, &cancel)?;
        let kind = ArchiveKind::classify(&object.name);

        if kind.is_archive() {
            let dir = object.target_dir(&workdir);
            fs::create_dir_all(&dir)?;
            info!("Expanding {} into {}", object.name, dir.display());
            Expander::new(cancel.clone()).expand(&object.name, object.body, &dir)?;
        } else {
            let path = object.target_file(&workdir);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            info!("Saving {} to {}", object.name, path.display());
            let mut body = object.body;
            let mut file = fs::File::create(&path)?;
            let _ = io::copy(&mut body, &mut file)?;
        }
        Ok(())
    })
    .await;

    match result {
        Err(_) if ctx.cancel.is_cancelled() => Err(AcquireError::Cancelled),
        other => other,
    }
}

/// Run `work` on a blocking thread, returning as soon as `cancel` fires
///
/// A cancelled thread is detached; it notices the token at its next check
/// or when its pending IO times out.
async fn run_blocking<F>(cancel: &CancellationToken, work: F) -> Result<(), AcquireError>
where
    F: FnOnce() -> Result<(), AcquireError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    tokio::select! {
        joined = handle => joined.map_err(|e| AcquireError::Io(io::Error::other(e)))?,
        () = cancel.cancelled() => Err(AcquireError::Cancelled),
    }
}

/// Expand a local archive into the working directory, or link a plain file there
async fn link_or_expand(ctx: &JobContext, path: PathBuf) -> Result<(), AcquireError> {
    let name = path.display().to_string();

    if ArchiveKind::classify(&name).is_archive() {
        ctx.log.line(format!("Expanding the source file {name}"));
        let cancel = ctx.cancel.clone();
        let workdir = ctx.workdir.clone();
        return run_blocking(&ctx.cancel, move || {
            let file = fs::File::open(&path)?;
            Expander::new(cancel).expand(&name, file, &workdir)?;
            Ok(())
        })
        .await;
    }

    let Some(file_name) = path.file_name() else {
        return Err(AcquireError::UnsupportedSourceType(name));
    };
    let link = ctx.workdir.join(file_name);
    ctx.log.line(format!("Linking {} to {}", link.display(), name));
    tokio::fs::symlink(&path, &link).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_storage::JobLog;
    use tempfile::TempDir;

    fn context(workdir: &TempDir) -> JobContext {
        JobContext::new(workdir.path(), workdir.path(), CancellationToken::new(), JobLog::detached())
    }

    #[tokio::test]
    async fn test_empty_source_is_noop() {
        let workdir = TempDir::new().unwrap();
        Acquirer::new(context(&workdir)).prepare_source("").await.unwrap();
        assert_eq!(fs::read_dir(workdir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_source() {
        let workdir = TempDir::new().unwrap();
        let result = Acquirer::new(context(&workdir)).prepare_source("ftp://host/src.zip").await;
        assert!(matches!(result, Err(AcquireError::UnsupportedSourceType(s)) if s == "ftp://host/src.zip"));
    }

    #[tokio::test]
    async fn test_local_plain_file_is_linked() {
        let workdir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let original = elsewhere.path().join("main.py");
        fs::write(&original, "print(1)\n").unwrap();

        Acquirer::new(context(&workdir))
            .prepare_source(&format!("file://{}", original.display()))
            .await
            .unwrap();

        let link = workdir.path().join("main.py");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), original);
        assert_eq!(fs::read_to_string(&original).unwrap(), "print(1)\n");
    }
}
