//! The job pipeline
//!
//! Stages run in order: source, data, image build, sandbox run, result
//! upload. Acquisition and build failures end the job before anything
//! runs. A failing sandbox is reported and the job goes on to upload
//! whatever it produced; only cancellation stops it there.

use crate::acquire::Acquirer;
use crate::context::JobContext;
use crate::script::JobScript;
use crate::upload::{upload_with_retry, UploadedObject, DEFAULT_COMPRESSION_THRESHOLD};
use crate::{JobError, Result};
use convenient_sandbox::{Builder, ContainerEngine, Runner, SandboxError};
use convenient_storage::{CredentialProvider, ObjectStore, StorageConnector};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a job that reached the upload stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Sandbox exit status; `None` if the sandbox never reported one
    pub exit_code: Option<i64>,
    /// Objects stored in the result container
    pub uploaded: Vec<UploadedObject>,
}

impl RunResult {
    /// Whether every command in the sandbox succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one job script against an engine and a store
pub struct Pipeline {
    ctx: JobContext,
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn StorageConnector>,
    credentials: Arc<dyn CredentialProvider>,
    compression_threshold: u64,
}

impl Pipeline {
    /// Pipeline uploading to `store`; `connector` and `credentials` serve the upload retry
    pub fn new(
        ctx: JobContext,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn StorageConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            ctx,
            engine,
            store,
            connector,
            credentials,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// Override the stdout compression threshold
    #[must_use]
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Run `script` to completion
    ///
    /// `script.name` must already be set; it tags the image and prefixes
    /// every uploaded object.
    pub async fn run(&self, script: &JobScript) -> Result<RunResult> {
        let log = &self.ctx.log;
        info!("Running job {}", script.name);

        let acquirer = Acquirer::new(self.ctx.clone());
        log.line("Start preparing source");
        if let Err(err) = acquirer.prepare_source(&script.source).await {
            log.line(format!("Failed to prepare source: {err}"));
            return Err(err.into());
        }
        log.line("Finished preparing source");

        if !script.data.is_empty() {
            log.line("Start downloading data files");
            if let Err(err) = acquirer.download_data_files(&script.data).await {
                log.line(format!("Failed to download data files: {err}"));
                return Err(err.into());
            }
            log.line("Finished downloading data files");
        }

        let tag = image_tag(&script.name);
        Builder::new(self.engine.clone(), log.clone(), self.ctx.cancel.clone())
            .build(&tag, &script.sandbox_spec(), &self.ctx.workdir)
            .await?;

        let runner = Runner::new(
            self.engine.clone(),
            log.clone(),
            self.ctx.cancel.clone(),
            &self.ctx.workdir,
            &self.ctx.stdout_dir,
        );
        let exit_code = match runner.run(&tag).await {
            Ok(()) => Some(0),
            Err(SandboxError::Cancelled) => return Err(SandboxError::Cancelled.into()),
            Err(SandboxError::ExecutionFailed { code }) => {
                log.line(format!("* Error occurs during execution: exit status {code}"));
                Some(code)
            }
            Err(err) => {
                warn!("Sandbox failed: {}", err);
                log.line(format!("* Error occurs during execution: {err}"));
                None
            }
        };

        if self.ctx.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let uploaded = upload_with_retry(
            &self.ctx,
            self.connector.as_ref(),
            self.credentials.as_ref(),
            self.store.clone(),
            script,
            self.compression_threshold,
        )
        .await?;

        info!("Job {} finished with {} uploaded objects", script.name, uploaded.len());
        Ok(RunResult { exit_code, uploaded })
    }
}

/// Docker accepts only lowercase repository names
fn image_tag(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag_is_lowercase() {
        assert_eq!(image_tag("Exp-1"), "exp-1");
        assert_eq!(image_tag("job-65f0a1b2"), "job-65f0a1b2");
    }

    #[test]
    fn test_run_result_succeeded() {
        let ok = RunResult {
            exit_code: Some(0),
            uploaded: Vec::new(),
        };
        let failed = RunResult {
            exit_code: Some(2),
            ..ok.clone()
        };
        assert!(ok.succeeded());
        assert!(!failed.succeeded());
    }
}
