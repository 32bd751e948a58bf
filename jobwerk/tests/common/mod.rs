//! Fakes shared by the jobwerk integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use convenient_sandbox::{
    BuildContext, BuildEvent, BuildSpec, ContainerEngine, ContainerSpec, EngineError, EventStream,
    OutputStream, SANDBOX_TMP_DIR,
};
use convenient_storage::{
    Container, CredentialProvider, FsObjectStore, JobLog, JobLogHandle, ObjectBody, ObjectStore,
    StorageConnector, StorageError, Token,
};
use flate2::read::GzDecoder;
use futures::StreamExt;
use jobwerk::JobContext;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Engine that "runs" a job by writing canned stdout files into the `/tmp` mount
#[derive(Default)]
pub struct ScriptedEngine {
    pub calls: Mutex<Vec<String>>,
    /// Paths of the last build context
    pub context: Mutex<Vec<String>>,
    pub created: Mutex<Option<ContainerSpec>>,
    /// Contents of `stdout<i>.txt`, written on start; `None` leaves the file out
    pub outputs: Vec<Option<Vec<u8>>>,
    pub exit_code: i64,
    pub build_error: Option<String>,
}

impl ScriptedEngine {
    pub fn printing(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|o| Some(o.as_bytes().to_vec())).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn build_image(&self, spec: &BuildSpec, mut context: BuildContext) -> Result<EventStream, EngineError> {
        self.record(format!("build {}", spec.tag));
        let mut raw = Vec::new();
        context
            .read_to_end(&mut raw)
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(&raw[..]));
        let mut paths = Vec::new();
        for entry in archive.entries().map_err(|e| EngineError::Other(e.to_string()))? {
            let entry = entry.map_err(|e| EngineError::Other(e.to_string()))?;
            paths.push(entry.path().unwrap().display().to_string());
        }
        *self.context.lock().unwrap() = paths;

        let event = match &self.build_error {
            Some(error) => BuildEvent {
                stream: None,
                error: Some(error.clone()),
            },
            None => BuildEvent {
                stream: Some(format!("Successfully tagged {}\n", spec.tag)),
                error: None,
            },
        };
        Ok(futures::stream::iter(vec![Ok(event)]).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record("create");
        *self.created.lock().unwrap() = Some(spec.clone());
        Ok("c0ffee".into())
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, EngineError> {
        self.record(format!("attach {id}"));
        Ok(futures::stream::empty().boxed())
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {id}"));
        let created = self.created.lock().unwrap().clone().unwrap();
        let tmp = created
            .mounts
            .iter()
            .find(|m| m.container == SANDBOX_TMP_DIR)
            .unwrap()
            .host
            .clone();
        for (index, output) in self.outputs.iter().enumerate() {
            if let Some(bytes) = output {
                std::fs::write(tmp.join(format!("stdout{index}.txt")), bytes).unwrap();
            }
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        self.record(format!("wait {id}"));
        Ok(self.exit_code)
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("kill {id}"));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("remove {id}"));
        Ok(())
    }
}

/// Local store that rejects the first `failures` puts, and any put of `poisoned`
pub struct FlakyStore {
    pub inner: FsObjectStore,
    pub failures: AtomicUsize,
    pub poisoned: Option<String>,
}

impl FlakyStore {
    pub fn new(root: &Path, failures: usize) -> Self {
        Self {
            inner: FsObjectStore::new(root),
            failures: AtomicUsize::new(failures),
            poisoned: None,
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(
        &self,
        container: Container,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> convenient_storage::Result<String> {
        if self.poisoned.as_deref() == Some(key) {
            return Err(StorageError::Server {
                key: key.to_string(),
                status: 500,
            });
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unauthorized("token expired".into()));
        }
        self.inner.put(container, key, body, content_type).await
    }

    async fn delete(&self, container: Container, key: &str) -> convenient_storage::Result<()> {
        self.inner.delete(container, key).await
    }
}

/// Hands out `fresh-<n>` tokens and counts refreshes
#[derive(Default)]
pub struct CountingProvider {
    pub refreshes: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn refresh_token(&self) -> convenient_storage::Result<Token> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(format!("fresh-{n}")))
    }
}

/// Connects stores that fail `failures` times each, recording the tokens it was given
pub struct RecordingConnector {
    pub root: std::path::PathBuf,
    pub failures: usize,
    pub tokens: Mutex<Vec<Option<String>>>,
}

impl RecordingConnector {
    pub fn new(root: &Path, failures: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            failures,
            tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StorageConnector for RecordingConnector {
    async fn connect(&self, token: Option<&Token>) -> convenient_storage::Result<Arc<dyn ObjectStore>> {
        self.tokens
            .lock()
            .unwrap()
            .push(token.map(|t| t.secret().to_string()));
        Ok(Arc::new(FlakyStore::new(&self.root, self.failures)))
    }
}

/// Job log collected in memory
pub fn memory_log() -> (JobLog, JobLogHandle<Vec<u8>>) {
    JobLog::spawn(Vec::new())
}

pub async fn log_text(handle: JobLogHandle<Vec<u8>>) -> String {
    String::from_utf8(handle.close().await.unwrap()).unwrap()
}

pub fn context(workdir: &Path, stdout_dir: &Path, log: JobLog) -> JobContext {
    JobContext::new(workdir, stdout_dir, CancellationToken::new(), log)
}

/// Serve `files` by request path from a thread per connection; other paths get 404
pub fn serve_files(files: Vec<(&'static str, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let files = Arc::new(files);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            let files = files.clone();
            thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request = String::new();
                let _ = reader.read_line(&mut request);
                let mut line = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                }
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match files.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => ("200 OK", body.clone()),
                    None => ("404 Not Found", b"not found".to_vec()),
                };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            });
        }
    });
    format!("http://{addr}")
}

/// Answer every request with 401 unless it carries `Bearer <token>`; counts rejections
pub fn serve_bearer(token: &'static str, rejected: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line.to_ascii_lowercase());
            }
            let status = if head.contains(&format!("authorization: bearer {token}")) {
                "200 OK"
            } else {
                let _ = rejected.fetch_add(1, Ordering::SeqCst);
                "401 Unauthorized"
            };
            let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

/// Accept connections and never answer; each connection is dropped after `hold`
pub fn serve_silence(hold: std::time::Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else {
                continue;
            };
            thread::spawn(move || {
                thread::sleep(hold);
                drop(stream);
            });
        }
    });
    format!("http://{addr}")
}

/// `tar.gz` bytes holding `files`
pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}
