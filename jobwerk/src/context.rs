//! Per-job context threaded through every stage

use convenient_storage::JobLog;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Everything a stage needs besides its own inputs
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Directory sources and data land in; mounted at `/data`
    pub workdir: PathBuf,
    /// Host directory mounted at `/tmp`, where `stdout<i>.txt` files appear
    pub stdout_dir: PathBuf,
    /// Root cancellation for the job
    pub cancel: CancellationToken,
    /// The job log
    pub log: JobLog,
}

impl JobContext {
    /// Context for a job rooted at `workdir`
    pub fn new(
        workdir: impl Into<PathBuf>,
        stdout_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
        log: JobLog,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            stdout_dir: stdout_dir.into(),
            cancel,
            log,
        }
    }

    /// Same job, with cancellation scoped to a child token
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }
}
