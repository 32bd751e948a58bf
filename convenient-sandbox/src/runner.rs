use crate::engine::{ContainerEngine, ContainerSpec, Mount, OutputStream, StreamKind};
use crate::template::{SANDBOX_DATA_DIR, SANDBOX_TMP_DIR};
use crate::{Result, SandboxError};
use convenient_storage::{JobLog, LineSplitter};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for trailing output once the container has stopped
const OUTPUT_GRACE: Duration = Duration::from_secs(5);

/// 95% of physical memory, or `None` when it cannot be determined
pub fn memory_limit() -> Option<i64> {
    match nix::sys::sysinfo::sysinfo() {
        Ok(info) => {
            let limit = info.ram_total() / 100 * 95;
            i64::try_from(limit).ok()
        }
        Err(err) => {
            warn!("Cannot determine host memory, running without a limit: {}", err);
            None
        }
    }
}

/// Runs a built sandbox image to completion
pub struct Runner {
    engine: Arc<dyn ContainerEngine>,
    log: JobLog,
    cancel: CancellationToken,
    workdir: PathBuf,
    stdout_dir: PathBuf,
}

impl Runner {
    /// Runner mounting `workdir` at `/data` and `stdout_dir` at `/tmp`
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        log: JobLog,
        cancel: CancellationToken,
        workdir: impl Into<PathBuf>,
        stdout_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            log,
            cancel,
            workdir: workdir.into(),
            stdout_dir: stdout_dir.into(),
        }
    }

    /// Create, start and wait for a container of `image`
    ///
    /// The container is removed on every path out of this function,
    /// cancellation included. A nonzero exit status yields
    /// `SandboxError::ExecutionFailed`.
    pub async fn run(&self, image: &str) -> Result<()> {
        let spec = ContainerSpec {
            image: image.to_string(),
            env: std::env::vars().map(|(k, v)| format!("{k}={v}")).collect(),
            memory: memory_limit(),
            mounts: vec![
                Mount::new(&self.workdir, SANDBOX_DATA_DIR),
                Mount::new(&self.stdout_dir, SANDBOX_TMP_DIR),
            ],
        };

        self.log.line(format!("Start the sandbox container of {image}"));
        // Creation is not raced against the token: a container created while
        // the job is being cancelled still needs its guard.
        let id = self.engine.create_container(&spec).await?;
        info!("Created container {} (memory limit {:?})", id, spec.memory);

        let guard = ContainerGuard::new(self.engine.clone(), id.clone());
        let result = if self.cancel.is_cancelled() {
            Err(SandboxError::Cancelled)
        } else {
            self.supervise(&id).await
        };
        guard.release().await;

        match &result {
            Ok(()) => self.log.line("Finished the sandbox container"),
            Err(err) => self.log.line(format!("{err}")),
        }
        result
    }

    async fn supervise(&self, id: &str) -> Result<()> {
        let output = self.engine.attach(id).await?;
        let mut forwarder = tokio::spawn(forward_output(output, self.log.clone()));

        let outcome = self.start_and_wait(id).await;

        if tokio::time::timeout(OUTPUT_GRACE, &mut forwarder).await.is_err() {
            debug!("Output of {} still open after {:?}, detaching", id, OUTPUT_GRACE);
            forwarder.abort();
        }
        outcome
    }

    async fn start_and_wait(&self, id: &str) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(SandboxError::Cancelled),
            started = self.engine.start(id) => started?,
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Cancelled, killing container {}", id);
                self.kill(id).await;
                Err(SandboxError::Cancelled)
            }
            status = self.engine.wait(id) => match status {
                Ok(0) => Ok(()),
                Ok(code) => Err(SandboxError::ExecutionFailed { code }),
                Err(err) => {
                    self.kill(id).await;
                    Err(err.into())
                }
            },
        }
    }

    async fn kill(&self, id: &str) {
        if let Err(err) = self.engine.kill(id).await {
            warn!("Failed to kill container {}: {}", id, err);
        }
    }
}

/// Forward container output into the job log, one splitter per stream
async fn forward_output(mut output: OutputStream, log: JobLog) {
    let mut stdout = LineSplitter::new();
    let mut stderr = LineSplitter::new();

    while let Some(frame) = output.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Container output stream failed: {}", err);
                break;
            }
        };
        let splitter = match frame.kind {
            StreamKind::Stdout => &mut stdout,
            StreamKind::Stderr => &mut stderr,
        };
        for line in splitter.push(&frame.data) {
            log.line(line);
        }
    }

    for splitter in [&mut stdout, &mut stderr] {
        if let Some(line) = splitter.finish() {
            log.line(line);
        }
    }
}

/// Removes the container when released or dropped
///
/// Removal does not look at the job's token, so it still happens after
/// cancellation.
struct ContainerGuard {
    engine: Arc<dyn ContainerEngine>,
    id: Option<String>,
}

impl ContainerGuard {
    fn new(engine: Arc<dyn ContainerEngine>, id: String) -> Self {
        Self { engine, id: Some(id) }
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            remove(self.engine.clone(), id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn(remove(self.engine.clone(), id))),
            Err(_) => warn!("No runtime left to remove container {}", id),
        }
    }
}

async fn remove(engine: Arc<dyn ContainerEngine>, id: String) {
    debug!("Removing container {}", id);
    if let Err(err) = engine.remove(&id).await {
        warn!("Failed to remove container {}: {}", id, err);
    }
}
