use crate::{Result, Token};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Stream handed to [`ObjectStore::put`]
pub type ObjectBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Fixed logical buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// Job configuration and scripts placed by the dispatcher
    Startup,
    /// Job logs and debug logs
    Log,
    /// Captured stdout and declared result files
    Result,
}

impl Container {
    /// Bucket name on the wire and on disk
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Log => "log",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object storage capability
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store everything `body` yields under `key`, returning the object's URL
    async fn put(
        &self,
        container: Container,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<String>;

    /// Remove `key` from `container`
    async fn delete(&self, container: Container, key: &str) -> Result<()>;
}

/// Builds a store, optionally with a freshly refreshed token
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// Connect; `None` means use whatever credential the connector was configured with
    async fn connect(&self, token: Option<&Token>) -> Result<Arc<dyn ObjectStore>>;
}
