//! Jobwerk command-line interface
//!
//! - `exec`: run one job script end to end

use clap::{Parser, Subcommand};

pub mod exec;

pub use exec::Exec;

/// Jobwerk - worker-side job agent
#[derive(Debug, Parser)]
#[command(name = "jobwerk")]
#[command(about = "Fetch a job's sources and data, run it in a sandbox, ship results and logs")]
#[command(version)]
pub struct Cli {
    /// What to do
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a job script
    Exec(Exec),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_exec() {
        let cli = Cli::try_parse_from([
            "jobwerk", "exec", "worker.yml", "job.yml", "exp-1", "--workdir", "/srv/job",
        ])
        .unwrap();
        let Commands::Exec(exec) = cli.command;
        assert_eq!(exec.config, PathBuf::from("worker.yml"));
        assert_eq!(exec.script, PathBuf::from("job.yml"));
        assert_eq!(exec.name, "exp-1");
        assert_eq!(exec.workdir, Some(PathBuf::from("/srv/job")));
        assert_eq!(exec.debug_file, PathBuf::from(exec::DEBUG_FILE));
    }

    #[test]
    fn test_exec_requires_name() {
        assert!(Cli::try_parse_from(["jobwerk", "exec", "worker.yml", "job.yml"]).is_err());
    }
}
