//! Jobwerk worker entry point

use clap::Parser;
use convenient_sandbox::{ContainerEngine, DockerEngine};
use jobwerk::commands::{exec, Cli, Commands};
use jobwerk::shutdown::install_shutdown_handler;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobwerk=info,convenient_sandbox=info,convenient_storage=info,job=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cancel = install_shutdown_handler();

    match cli.command {
        Commands::Exec(args) => {
            let engine: Arc<dyn ContainerEngine> = match DockerEngine::connect() {
                Ok(engine) => Arc::new(engine),
                Err(err) => {
                    tracing::error!("Cannot connect to the container engine: {}", err);
                    return ExitCode::FAILURE;
                }
            };

            match exec::execute(&args, engine, cancel).await {
                Ok(result) => {
                    tracing::info!(
                        "Job {} done (exit status {:?}, {} result files)",
                        args.name,
                        result.exit_code,
                        result.uploaded.len()
                    );
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    tracing::error!("Job {} failed: {}", args.name, err);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
