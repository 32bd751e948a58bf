use crate::engine::{
    BuildContext, BuildEvent, BuildSpec, ContainerEngine, ContainerSpec, EventStream, OutputFrame,
    OutputStream, StreamKind,
};
use crate::EngineError;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::debug;

const EVENT_BUFFER: usize = 64;

/// [`ContainerEngine`] backed by the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build_image(&self, spec: &BuildSpec, context: BuildContext) -> Result<EventStream, EngineError> {
        let options = BuildImageOptions {
            dockerfile: spec.dockerfile.clone(),
            t: spec.tag.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let body = hyper::Body::wrap_stream(ReaderStream::new(context));

        // The daemon's event stream borrows the client, so a task owning a
        // clone forwards it. Dropping the receiver ends the build request.
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let _forwarder = tokio::spawn(async move {
            let mut events = Box::pin(docker.build_image(options, None, Some(body)));
            while let Some(event) = events.next().await {
                let event = event
                    .map(|info| BuildEvent {
                        stream: info.stream,
                        error: info.error,
                    })
                    .map_err(EngineError::from);
                if tx.send(event).await.is_err() {
                    debug!("Build event receiver dropped, abandoning the build stream");
                    break;
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let host_config = HostConfig {
            memory: spec.memory,
            binds: Some(spec.mounts.iter().map(|m| m.bind()).collect()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        for warning in &created.warnings {
            debug!("Docker: {}", warning);
        }
        Ok(created.id)
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, EngineError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let attached = self.docker.attach_container(id, Some(options)).await?;

        let frames = attached.output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputFrame {
                        kind: StreamKind::Stdout,
                        data: message,
                    }))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame {
                    kind: StreamKind::Stderr,
                    data: message,
                })),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(err) => Some(Err(EngineError::from(err))),
            }
        });
        Ok(frames.boxed())
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut waits = Box::pin(self.docker.wait_container(id, Some(options)));
        match waits.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports nonzero exits as errors
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(EngineError::Other(format!("wait on container {id} ended without a status"))),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}
