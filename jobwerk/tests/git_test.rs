//! Git sources pulled from a local repository

mod common;

use common::{context, log_text, memory_log};
use jobwerk::{AcquireError, Acquirer};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=Jobwerk", "-c", "user.email=jobwerk@localhost"])
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// A working repository at `<root>/origin.git` with one commit
fn origin(root: &Path) -> std::path::PathBuf {
    let repo = root.join("origin.git");
    fs::create_dir_all(repo.join("scripts")).unwrap();
    fs::write(repo.join("main.sh"), "echo from git\n").unwrap();
    fs::write(repo.join("scripts/setup.sh"), "true\n").unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "initial"]);
    repo
}

#[tokio::test]
async fn test_git_source_is_pulled_into_workdir() {
    if !git_available() {
        return;
    }
    let remote = TempDir::new().unwrap();
    let repo = origin(remote.path());
    let workdir = TempDir::new().unwrap();
    let (log, handle) = memory_log();

    Acquirer::new(context(workdir.path(), workdir.path(), log.clone()))
        .prepare_source(&repo.display().to_string())
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(workdir.path().join("main.sh")).unwrap(), "echo from git\n");
    assert_eq!(fs::read_to_string(workdir.path().join("scripts/setup.sh")).unwrap(), "true\n");
    assert!(workdir.path().join(".git").is_dir());

    drop(log);
    let text = log_text(handle).await;
    assert!(text.contains(&format!("Cloning the source repository {}", repo.display())));
    assert!(text.contains("FETCH_HEAD"), "git output missing from {text}");
    assert!(text.contains("Finished cloning the source repository"));
}

#[tokio::test]
async fn test_missing_repository_is_a_git_error() {
    if !git_available() {
        return;
    }
    let remote = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let (log, _handle) = memory_log();
    let missing = remote.path().join("absent.git");

    let result = Acquirer::new(context(workdir.path(), workdir.path(), log))
        .prepare_source(&missing.display().to_string())
        .await;

    assert!(matches!(result, Err(AcquireError::Git { step: "pull", .. })), "{result:?}");
}
