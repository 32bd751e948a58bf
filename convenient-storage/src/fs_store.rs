use crate::{Container, ObjectBody, ObjectStore, Result, StorageConnector, StorageError, Token};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Object store backed by a local directory
///
/// Objects live at `<root>/<container>/<key>`; URLs are `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path an object is stored at
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKey` for keys that are empty, absolute or
    /// contain `..`
    pub fn object_path(&self, container: Container, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !clean {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(container.as_str()).join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        container: Container,
        key: &str,
        mut body: ObjectBody,
        _content_type: &str,
    ) -> Result<String> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        debug!("Storing {}", path.display());
        let mut file = fs::File::create(&path).await?;
        let _ = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        Ok(format!("file://{}", path.display()))
    }

    async fn delete(&self, container: Container, key: &str) -> Result<()> {
        let path = self.object_path(container, key)?;
        debug!("Removing {}", path.display());
        fs::remove_file(&path).await?;
        Ok(())
    }
}

/// Connector for [`FsObjectStore`]; tokens are ignored
#[derive(Debug, Clone)]
pub struct FsConnector {
    root: PathBuf,
}

impl FsConnector {
    /// Connector for stores rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageConnector for FsConnector {
    async fn connect(&self, _token: Option<&Token>) -> Result<Arc<dyn ObjectStore>> {
        fs::create_dir_all(&self.root).await?;
        Ok(Arc::new(FsObjectStore::new(&self.root)))
    }
}
