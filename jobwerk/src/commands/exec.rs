//! Exec command
//!
//! Wires the worker's collaborators around one pipeline run:
//! 1. Load the worker configuration
//! 2. Open the local debug file
//! 3. Connect to storage, refreshing the credential once if needed
//! 4. Stream the job log to `<name>.log`
//! 5. Remove the startup objects
//! 6. Load the script and run the pipeline
//! 7. Flush the job log, then ship the debug file as `<name>-debug.log`

use crate::config::WorkerConfig;
use crate::context::JobContext;
use crate::pipeline::{Pipeline, RunResult};
use crate::script::JobScript;
use crate::Result;
use clap::Args;
use convenient_sandbox::ContainerEngine;
use convenient_storage::{
    Container, CredentialProvider, DebugSink, JobLog, LogWriter, ObjectStore, StorageConnector,
    StorageError,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default name of the local debug file
pub const DEBUG_FILE: &str = "stderr.txt";

/// Arguments of `jobwerk exec`
#[derive(Debug, Clone, Args)]
pub struct Exec {
    /// Worker configuration file; also its key in the startup container
    pub config: PathBuf,

    /// Job script file; also its key in the startup container
    pub script: PathBuf,

    /// Job name used for the log object and as fallback script name
    pub name: String,

    /// Working directory for sources and data (default: current directory)
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Local file collecting diagnostics that cannot go to the job log
    #[arg(long, default_value = DEBUG_FILE)]
    pub debug_file: PathBuf,
}

/// Run the job described by `args`
///
/// Storage failures before the job log exists end the command early.
/// Afterwards every outcome is recorded in the job log, which is flushed
/// to storage before this returns.
pub async fn execute(
    args: &Exec,
    engine: Arc<dyn ContainerEngine>,
    cancel: CancellationToken,
) -> Result<RunResult> {
    info!("Reading config {}", args.config.display());
    let config = WorkerConfig::load(&args.config).await?;
    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let debug = open_debug_sink(&args.debug_file);
    let connector = config.connector();
    let credentials = config.credential_provider();

    info!("Creating a storage service");
    let store = match connect_with_refresh(connector.as_ref(), credentials.as_ref()).await {
        Ok(store) => store,
        Err(err) => {
            report(&debug, &format!("Cannot connect to storage: {err}"));
            return Err(err.into());
        }
    };

    info!("Creating a logger");
    let writer = LogWriter::new(store.clone(), format!("{}.log", args.name), Some(debug.clone()));
    let (log, handle) = JobLog::spawn(writer);
    let ctx = JobContext::new(&workdir, &config.sandbox.stdout_dir, cancel, log.clone());

    let outcome = run_job(args, &config, &ctx, engine, store.clone(), connector, credentials).await;
    match &outcome {
        Ok(result) => log.line(format!(
            "Job {} finished: exit status {:?}, {} result files",
            args.name,
            result.exit_code,
            result.uploaded.len()
        )),
        Err(err) => log.line(format!("Job {} failed: {}", args.name, err)),
    }

    match handle.close().await {
        Ok(writer) => {
            if let Err(err) = writer.close().await {
                report(&debug, &format!("Cannot close the job log: {err}"));
            }
        }
        Err(err) => report(&debug, &format!("Job log task failed: {err}")),
    }

    upload_debug_file(store.as_ref(), &args.debug_file, &args.name, &debug).await;
    outcome
}

async fn run_job(
    args: &Exec,
    config: &WorkerConfig,
    ctx: &JobContext,
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn StorageConnector>,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<RunResult> {
    delete_startup_object(store.as_ref(), &ctx.log, "config", &args.config).await;
    delete_startup_object(store.as_ref(), &ctx.log, "script", &args.script).await;

    let mut script = match JobScript::load(&args.script).await {
        Ok(script) => script,
        Err(err) => {
            ctx.log.line(format!("Cannot read any script file: {err}"));
            return Err(err);
        }
    };
    script.ensure_name(Some(&args.name));
    config.apply_defaults(&mut script);

    Pipeline::new(ctx.clone(), engine, store, connector, credentials)
        .with_threshold(config.sandbox.compression_threshold)
        .run(&script)
        .await
}

/// Connect, and on failure refresh the credential and connect exactly once more
pub async fn connect_with_refresh(
    connector: &dyn StorageConnector,
    credentials: &dyn CredentialProvider,
) -> std::result::Result<Arc<dyn ObjectStore>, StorageError> {
    match connector.connect(None).await {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!("Cannot connect to storage, refreshing the access token: {}", err);
            let token = credentials.refresh_token().await?;
            connector.connect(Some(&token)).await
        }
    }
}

/// Best-effort removal of a file the dispatcher staged in the startup container
async fn delete_startup_object(store: &dyn ObjectStore, log: &JobLog, what: &str, path: &Path) {
    log.line(format!("Deleting the {what} file from the cloud storage"));
    let Some(key) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        log.line(format!("* Cannot determine the name of the {what} file"));
        return;
    };
    if let Err(err) = store.delete(Container::Startup, &key).await {
        log.line(format!("* Cannot delete the {what} file from the cloud storage: {err}"));
    }
}

fn open_debug_sink(path: &Path) -> DebugSink {
    let sink: DebugSink = match std::fs::File::create(path) {
        Ok(file) => Arc::new(Mutex::new(file)),
        Err(err) => {
            warn!("Cannot create debug file {}: {}", path.display(), err);
            Arc::new(Mutex::new(std::io::stderr()))
        }
    };
    sink
}

fn report(debug: &DebugSink, message: &str) {
    error!("{}", message);
    if let Ok(mut sink) = debug.lock() {
        let _ = writeln!(sink, "{} {}", chrono::Utc::now().format("%Y/%m/%d %H:%M:%S"), message);
        let _ = sink.flush();
    }
}

async fn upload_debug_file(store: &dyn ObjectStore, path: &Path, name: &str, debug: &DebugSink) {
    if let Ok(mut sink) = debug.lock() {
        let _ = sink.flush();
    }
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            warn!("Cannot open debug file {}: {}", path.display(), err);
            return;
        }
    };
    let key = format!("{name}-debug.log");
    match store.put(Container::Log, &key, Box::new(file), "text/plain").await {
        Ok(url) => info!("Debug file is uploaded to {}", url),
        Err(err) => warn!("Cannot upload debug file {}: {}", key, err),
    }
}
