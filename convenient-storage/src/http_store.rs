use crate::{Container, ObjectBody, ObjectStore, Result, StorageConnector, StorageError, Token};
use async_trait::async_trait;
use reqwest::{Body, Client, StatusCode};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Object store reached over HTTP
///
/// Objects live at `<base>/<container>/<key>`. `PUT` streams the body with
/// chunked transfer encoding, `DELETE` removes it. Both send the token as a
/// bearer credential when one is set.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base_url: String,
    token: Option<Token>,
    client: Client,
}

impl HttpObjectStore {
    /// Create a store rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidUrl` unless `base_url` is an http(s) URL
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let parsed =
            url::Url::parse(&base_url).map_err(|_| StorageError::InvalidUrl(base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StorageError::InvalidUrl(base_url));
        }

        Ok(Self {
            base_url,
            token,
            client: Client::new(),
        })
    }

    fn object_url(&self, container: Container, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, container, key.trim_start_matches('/'))
    }

    /// Check the credential with an authenticated `HEAD` on the base URL
    ///
    /// Only 401 and 403 count as a rejection; servers that do not serve the
    /// base URL answer 404 or 405, which is fine.
    pub async fn verify(&self) -> Result<()> {
        let response = self.authorize(self.client.head(&self.base_url)).send().await?;
        let status = response.status();
        debug!("Credential check on {} answered {}", self.base_url, status);
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(StorageError::Unauthorized(self.base_url.clone()));
        }
        Ok(())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.secret()),
            None => request,
        }
    }
}

fn check_status(status: StatusCode, key: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(StorageError::Unauthorized(key.to_string()));
    }
    Err(StorageError::Server {
        key: key.to_string(),
        status: status.as_u16(),
    })
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        container: Container,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<String> {
        let url = self.object_url(container, key);
        debug!("Uploading {}", url);

        let request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(Body::wrap_stream(ReaderStream::new(body)));
        let response = self.authorize(request).send().await?;
        check_status(response.status(), key)?;

        Ok(url)
    }

    async fn delete(&self, container: Container, key: &str) -> Result<()> {
        let url = self.object_url(container, key);
        debug!("Deleting {}", url);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        check_status(response.status(), key)
    }
}

/// Connects [`HttpObjectStore`]s, swapping in refreshed tokens
///
/// Each connection checks its credential against the server, so a rejected
/// token surfaces as `StorageError::Unauthorized` before any upload.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: String,
    token: Option<Token>,
}

impl HttpConnector {
    /// Connector for `base_url`, using `token` until a refreshed one is given
    pub fn new(base_url: impl Into<String>, token: Option<Token>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl StorageConnector for HttpConnector {
    async fn connect(&self, token: Option<&Token>) -> Result<Arc<dyn ObjectStore>> {
        let token = token.or(self.token.as_ref()).cloned();
        let store = HttpObjectStore::new(&self.base_url, token)?;
        store.verify().await?;
        Ok(Arc::new(store))
    }
}
