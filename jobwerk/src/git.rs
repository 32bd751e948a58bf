//! Git checkout through the system git command

use crate::AcquireError;
use crate::context::JobContext;
use convenient_storage::{JobLog, LineSplitter};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

/// Initialize the working directory as a repository and pull `url`'s default branch
pub(crate) async fn pull_repository(ctx: &JobContext, url: &str) -> Result<(), AcquireError> {
    info!("Pulling {} into {}", url, ctx.workdir.display());
    run_git(ctx, "init", &["init", "--quiet"]).await?;
    run_git(ctx, "remote add", &["remote", "add", "origin", url]).await?;
    run_git(ctx, "pull", &["pull", "--progress", "origin", "HEAD"]).await
}

/// Run one git step, forwarding its output line by line to the job log
async fn run_git(ctx: &JobContext, step: &'static str, args: &[&str]) -> Result<(), AcquireError> {
    debug!("git {}", args.join(" "));
    let mut child = Command::new("git")
        .args(args)
        .current_dir(&ctx.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AcquireError::Git {
            step,
            message: format!("failed to execute git: {e}"),
        })?;

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(forward_lines(stdout, ctx.log.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(forward_lines(stderr, ctx.log.clone())));
    }

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(AcquireError::Cancelled);
        }
        status = child.wait() => status?,
    };
    for forwarder in forwarders {
        let _ = forwarder.await;
    }

    if !status.success() {
        return Err(AcquireError::Git {
            step,
            message: status.to_string(),
        });
    }
    Ok(())
}

async fn forward_lines<R: AsyncRead + Unpin>(mut reader: R, log: JobLog) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    log.line(line);
                }
            }
        }
    }
    if let Some(line) = splitter.finish() {
        log.line(line);
    }
}
