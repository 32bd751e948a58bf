use crate::lines::fragments;
use chrono::Utc;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Lines queued between producers and the sink before new ones are dropped
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

#[derive(Debug)]
enum Message {
    Line(String),
    Close,
}

/// Cloneable handle to the job's log
///
/// Every call to [`JobLog::line`] becomes whole, timestamped lines in the
/// sink; a single drain task owns the sink, so lines from concurrent tasks
/// never interleave mid-line. Each line is mirrored to `tracing` under the
/// `job` target.
///
/// The queue is bounded. While the sink is stalled, lines beyond its
/// capacity are dropped and counted; the count is written to the sink once
/// it catches up.
#[derive(Debug, Clone)]
pub struct JobLog {
    tx: mpsc::Sender<Message>,
    dropped: Arc<AtomicU64>,
}

/// Owner side of a [`JobLog`], returns the sink once drained
#[derive(Debug)]
pub struct JobLogHandle<W> {
    tx: mpsc::Sender<Message>,
    task: JoinHandle<W>,
}

impl JobLog {
    /// Start draining lines into `sink`
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<W>(sink: W) -> (Self, JobLogHandle<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_with_capacity(sink, DEFAULT_LOG_CAPACITY)
    }

    /// Like [`JobLog::spawn`], queueing at most `capacity` lines
    pub fn spawn_with_capacity<W>(sink: W, capacity: usize) -> (Self, JobLogHandle<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(drain(rx, sink, dropped.clone()));
        (Self { tx: tx.clone(), dropped }, JobLogHandle { tx, task })
    }

    /// A log that only mirrors to `tracing`
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log `message`, one timestamped line per `\n`/`\r` separated fragment
    pub fn line(&self, message: impl AsRef<str>) {
        let stamp = Utc::now().format(TIMESTAMP_FORMAT);
        for fragment in fragments(message.as_ref()) {
            info!(target: "job", "{}", fragment);
            // a closed log still reaches tracing
            let line = Message::Line(format!("{stamp} {fragment}\n"));
            if let Err(TrySendError::Full(_)) = self.tx.try_send(line) {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<W> JobLogHandle<W> {
    /// Stop accepting lines, flush the ones already queued, return the sink
    ///
    /// # Errors
    ///
    /// Fails only if the drain task panicked.
    pub async fn close(self) -> io::Result<W> {
        let _ = self.tx.send(Message::Close).await;
        self.task.await.map_err(io::Error::other)
    }
}

async fn drain<W>(mut rx: mpsc::Receiver<Message>, mut sink: W, dropped: Arc<AtomicU64>) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut healthy = true;
    while let Some(message) = rx.recv().await {
        let line = match message {
            Message::Line(line) => line,
            Message::Close => break,
        };
        if !healthy {
            continue;
        }
        if let Err(err) = sink.write_all(line.as_bytes()).await {
            warn!("Job log sink failed, further lines only reach tracing: {}", err);
            healthy = false;
            continue;
        }
        if rx.is_empty() {
            healthy = report_dropped(&mut sink, &dropped).await;
        }
    }

    if healthy {
        healthy = report_dropped(&mut sink, &dropped).await;
    }
    if healthy {
        if let Err(err) = sink.flush().await {
            warn!("Failed to flush job log: {}", err);
        }
    }
    sink
}

/// Write how many lines were lost while the sink was stalled, if any
async fn report_dropped<W: AsyncWrite + Unpin>(sink: &mut W, dropped: &AtomicU64) -> bool {
    let count = dropped.swap(0, Ordering::Relaxed);
    if count == 0 {
        return true;
    }
    warn!("Job log queue was full, dropped {} lines", count);
    let stamp = Utc::now().format(TIMESTAMP_FORMAT);
    let note = format!("{stamp} * {count} log lines dropped\n");
    match sink.write_all(note.as_bytes()).await {
        Ok(()) => true,
        Err(err) => {
            warn!("Job log sink failed, further lines only reach tracing: {}", err);
            false
        }
    }
}
