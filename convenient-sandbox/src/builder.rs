use crate::context::write_build_context;
use crate::engine::{BuildSpec, ContainerEngine};
use crate::template::{render_dockerfile, render_entrypoint, SandboxSpec, DOCKERFILE_PATH};
use crate::{Result, SandboxError};
use convenient_storage::{fragments, JobLog};
use futures::StreamExt;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Builds sandbox images from a source tree
pub struct Builder {
    engine: Arc<dyn ContainerEngine>,
    log: JobLog,
    cancel: CancellationToken,
}

impl Builder {
    /// Builder logging to `log`, stopping when `cancel` fires
    pub fn new(engine: Arc<dyn ContainerEngine>, log: JobLog, cancel: CancellationToken) -> Self {
        Self { engine, log, cancel }
    }

    /// Build `tag` from `source_root` and the generated files for `spec`
    ///
    /// The archive producer and the engine consume the same bounded pipe
    /// concurrently. Whichever side fails first cancels the other and its
    /// error is returned.
    pub async fn build(&self, tag: &str, spec: &SandboxSpec, source_root: &Path) -> Result<()> {
        info!("Building sandbox image {} from {}", tag, source_root.display());
        self.log.line(format!("Start building a sandbox image {tag}"));

        let token = self.cancel.child_token();
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

        let producer = {
            let token = token.clone();
            let handle = spawn_producer(source_root, spec, writer, token.clone());
            async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join) => Err(SandboxError::Io(io::Error::other(join))),
                };
                if result.is_err() {
                    token.cancel();
                }
                result
            }
        };

        let consumer = async {
            let result = self.consume(tag, reader, &token).await;
            if result.is_err() {
                token.cancel();
            }
            result
        };

        let outcome = tokio::try_join!(producer, consumer).map(|_| ());
        match &outcome {
            Ok(()) => self.log.line(format!("Finished building the sandbox image {tag}")),
            Err(err) => self.log.line(format!("Failed to build the sandbox image {tag}: {err}")),
        }
        outcome
    }

    async fn consume(&self, tag: &str, reader: DuplexStream, token: &CancellationToken) -> Result<()> {
        let spec = BuildSpec {
            tag: tag.to_string(),
            dockerfile: DOCKERFILE_PATH.to_string(),
        };

        let mut events = tokio::select! {
            _ = token.cancelled() => return Err(SandboxError::Cancelled),
            events = self.engine.build_image(&spec, Box::new(reader)) => events?,
        };

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Err(SandboxError::Cancelled),
                event = events.next() => event,
            };
            let Some(event) = event else {
                break;
            };
            let event = event?;

            if let Some(error) = event.error {
                return Err(SandboxError::BuildFailed(error));
            }
            if let Some(stream) = event.stream {
                for line in fragments(&stream) {
                    self.log.line(line);
                }
            }
        }

        debug!("Build event stream for {} ended", tag);
        Ok(())
    }
}

fn spawn_producer(
    source_root: &Path,
    spec: &SandboxSpec,
    writer: DuplexStream,
    token: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    let root = source_root.to_path_buf();
    let dockerfile = render_dockerfile(spec);
    let entrypoint = render_entrypoint(spec);
    let bridge = SyncIoBridge::new(writer);

    tokio::task::spawn_blocking(move || {
        let out = BufWriter::new(bridge);
        let out = write_build_context(&root, &dockerfile, &entrypoint, out, &token)?;
        let mut bridge = out.into_inner().map_err(|e| e.into_error())?;
        bridge.shutdown()?;
        Ok(())
    })
}
