//! In-memory container engine recording every call

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use convenient_sandbox::{
    BuildContext, BuildEvent, BuildSpec, ContainerEngine, ContainerSpec, EngineError, EventStream,
    OutputFrame, OutputStream, StreamKind,
};
use flate2::read::GzDecoder;
use futures::StreamExt;
use std::io::Read;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<String>>,
    /// Entries of the last build context, in archive order
    pub context: Mutex<Vec<(String, Vec<u8>)>>,
    pub created: Mutex<Option<ContainerSpec>>,
    pub build_error: Option<String>,
    pub create_error: bool,
    pub wait_error: bool,
    pub hang: bool,
    pub exit_code: i64,
    pub output: Vec<OutputFrame>,
    pub killed: CancellationToken,
    /// Cancelled from inside `create_container`, before the id comes back
    pub cancel_during_create: Option<CancellationToken>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

pub fn stdout(text: &str) -> OutputFrame {
    OutputFrame {
        kind: StreamKind::Stdout,
        data: Bytes::from(text.to_string()),
    }
}

pub fn stderr(text: &str) -> OutputFrame {
    OutputFrame {
        kind: StreamKind::Stderr,
        data: Bytes::from(text.to_string()),
    }
}

fn list_context(gzipped: &[u8]) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    let mut archive = tar::Archive::new(GzDecoder::new(gzipped));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.display().to_string();
        let mut body = Vec::new();
        let _ = entry.read_to_end(&mut body)?;
        entries.push((path, body));
    }
    Ok(entries)
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_image(&self, spec: &BuildSpec, mut context: BuildContext) -> Result<EventStream, EngineError> {
        self.record(format!("build {}", spec.tag));
        let mut raw = Vec::new();
        context
            .read_to_end(&mut raw)
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;
        let entries = list_context(&raw).map_err(|e| EngineError::Other(e.to_string()))?;
        *self.context.lock().unwrap() = entries;

        let mut events = vec![Ok(BuildEvent {
            stream: Some("Step 1/2 : FROM ubuntu:latest\n\r".into()),
            error: None,
        })];
        match &self.build_error {
            Some(error) => events.push(Ok(BuildEvent {
                stream: None,
                error: Some(error.clone()),
            })),
            None => events.push(Ok(BuildEvent {
                stream: Some(format!("Successfully tagged {}\n", spec.tag)),
                error: None,
            })),
        }
        Ok(futures::stream::iter(events).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record("create");
        if self.create_error {
            return Err(EngineError::Other("no such image".into()));
        }
        *self.created.lock().unwrap() = Some(spec.clone());
        if let Some(token) = &self.cancel_during_create {
            token.cancel();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        Ok("c0ffee".into())
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, EngineError> {
        self.record(format!("attach {id}"));
        let frames = futures::stream::iter(self.output.clone().into_iter().map(Ok));
        if !self.hang {
            return Ok(frames.boxed());
        }
        // a hanging container keeps its output open until killed
        let killed = self.killed.clone();
        let tail = futures::stream::unfold(killed, |killed| async move {
            killed.cancelled().await;
            None::<(Result<OutputFrame, EngineError>, CancellationToken)>
        });
        Ok(frames.chain(tail).boxed())
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {id}"));
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        self.record(format!("wait {id}"));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.wait_error {
            return Err(EngineError::Other("daemon went away".into()));
        }
        Ok(self.exit_code)
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("kill {id}"));
        self.killed.cancel();
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("remove {id}"));
        Ok(())
    }
}
