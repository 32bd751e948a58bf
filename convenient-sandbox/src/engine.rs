use crate::EngineError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Gzipped tar stream fed to an image build
pub type BuildContext = Box<dyn AsyncRead + Send + Unpin>;

/// Build progress as reported by the engine
pub type EventStream = BoxStream<'static, Result<BuildEvent, EngineError>>;

/// Demultiplexed container output
pub type OutputStream = BoxStream<'static, Result<OutputFrame, EngineError>>;

/// What to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Image tag to produce
    pub tag: String,
    /// Dockerfile path inside the build context
    pub dockerfile: String,
}

/// One build log record; exactly one field is usually set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEvent {
    /// Free text progress fragment
    pub stream: Option<String>,
    /// Build error, aborts the build
    pub error: Option<String>,
}

/// Host path bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path on the host
    pub host: PathBuf,
    /// Path inside the container
    pub container: String,
}

impl Mount {
    /// Bind `host` at `container`
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    /// `host:container` bind specification
    #[must_use]
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image to run
    pub image: String,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Memory cap in bytes, `None` for unlimited
    pub memory: Option<i64>,
    /// Bind mounts
    pub mounts: Vec<Mount>,
}

/// Which container stream a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// A chunk of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    /// Source stream
    pub kind: StreamKind,
    /// Raw bytes, not aligned to lines
    pub data: Bytes,
}

/// Image build and container lifecycle capability
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start building an image from `context`; the stream ends when the build does
    async fn build_image(&self, spec: &BuildSpec, context: BuildContext) -> Result<EventStream, EngineError>;

    /// Create a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Attach to stdout and stderr; must be called before `start`
    async fn attach(&self, id: &str) -> Result<OutputStream, EngineError>;

    /// Start a created container
    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Wait until the container stops, returning its exit status
    async fn wait(&self, id: &str) -> Result<i64, EngineError>;

    /// Force-stop a running container
    async fn kill(&self, id: &str) -> Result<(), EngineError>;

    /// Remove a container, running or not
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}
