use crate::{Container, ObjectStore};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Local sink for diagnostics that must not go through the job log itself
pub type DebugSink = Arc<Mutex<dyn Write + Send>>;

/// Writes that stream into an object in the log container
///
/// Bytes written here travel through a bounded pipe to a background upload
/// task, so the log is never held in memory as a whole. [`LogWriter::close`]
/// returns only after the upload has seen end of stream and finished.
/// Upload failures go to the debug sink and never surface to the writer.
pub struct LogWriter {
    key: String,
    pipe: Option<DuplexStream>,
    done: Option<oneshot::Receiver<()>>,
}

impl LogWriter {
    /// Start streaming to `key` in [`Container::Log`]
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>, debug: Option<DebugSink>) -> Self {
        let key = key.into();
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let upload_key = key.clone();
        drop(tokio::spawn(async move {
            match store
                .put(Container::Log, &upload_key, Box::new(reader), "text/plain")
                .await
            {
                Ok(url) => debug!("Log {} stored at {}", upload_key, url),
                Err(err) => {
                    warn!("Failed to upload log {}: {}", upload_key, err);
                    if let Some(sink) = debug {
                        report(&sink, &format!("Failed to upload log {upload_key}: {err}"));
                    }
                }
            }
            let _ = done_tx.send(());
        }));

        Self {
            key,
            pipe: Some(writer),
            done: Some(done_rx),
        }
    }

    /// Object key the log is stored under
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Close the pipe and wait for the upload to finish
    ///
    /// # Errors
    ///
    /// Only fails if the pipe cannot be shut down; upload failures are
    /// reported to the debug sink instead.
    pub async fn close(mut self) -> io::Result<()> {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.shutdown().await?;
        }
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
        Ok(())
    }

    fn pipe(&mut self) -> io::Result<&mut DuplexStream> {
        self.pipe
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "log writer closed"))
    }
}

/// Append one line to a debug sink, ignoring a poisoned lock or a full disk
pub(crate) fn report(sink: &DebugSink, message: &str) {
    if let Ok(mut writer) = sink.lock() {
        let _ = writeln!(writer, "{message}");
        let _ = writer.flush();
    }
}

impl AsyncWrite for LogWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut().pipe() {
            Ok(pipe) => Pin::new(pipe).poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe() {
            Ok(pipe) => Pin::new(pipe).poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("key", &self.key)
            .field("open", &self.pipe.is_some())
            .finish()
    }
}
