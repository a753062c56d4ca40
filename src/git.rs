//! Thin async wrapper around the `git` executable

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Default limit for a single git invocation
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("could not spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("'git {command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("{operation} failed: {stderr}")]
    Failed { operation: String, stderr: String },
}

/// Runs git commands with a timeout. Child processes are killed when the
/// returned futures are dropped.
#[derive(Debug, Clone)]
pub struct Git {
    timeout: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }
}

impl Git {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Shallow clone of `repo_url` into `dest` at `git_ref`.
    ///
    /// Branch and tag names are cloned with `--branch`. A full commit hash is
    /// fetched on its own. An abbreviated hash, or a full one the server will
    /// not serve by id, falls back to a complete clone and a checkout.
    pub async fn clone_shallow(
        &self,
        repo_url: &str,
        git_ref: Option<&str>,
        dest: &Path,
    ) -> Result<(), GitError> {
        tracing::debug!(repo_url, git_ref, dest = %dest.display(), "Cloning repository");

        let first = match git_ref {
            Some(commit) if is_full_commit_hash(commit) => self.fetch_commit(repo_url, commit, dest).await,
            _ => self.clone_branch(repo_url, git_ref, dest).await,
        };
        match (first, git_ref) {
            (Err(e), Some(commit)) if is_commit_hash(commit) => {
                tracing::debug!(repo_url, commit, error = %e, "Falling back to a full clone");
                if tokio::fs::try_exists(dest).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_dir_all(dest).await;
                }
                self.clone_and_checkout(repo_url, commit, dest).await
            }
            (result, _) => result,
        }
    }

    async fn clone_branch(&self, repo_url: &str, branch: Option<&str>, dest: &Path) -> Result<(), GitError> {
        let mut command = self.command();
        command.args(["clone", "--depth", "1", "--single-branch", "--no-tags"]);
        if let Some(branch) = branch {
            command.args(["--branch", branch]);
        }
        command.arg("--").arg(repo_url).arg(dest);
        let output = self.run(command, "clone").await?;
        check_git_output(&output, "git clone")
    }

    /// Fetches exactly one commit into a fresh repository at `dest`.
    async fn fetch_commit(&self, repo_url: &str, commit: &str, dest: &Path) -> Result<(), GitError> {
        let mut command = self.command();
        command.args(["init", "--quiet"]).arg(dest);
        let output = self.run(command, "init").await?;
        check_git_output(&output, "git init")?;

        self.query(dest, &["remote", "add", "origin", repo_url]).await?;
        self.query(dest, &["fetch", "--depth", "1", "--no-tags", "origin", commit])
            .await?;
        self.query(dest, &["checkout", "--quiet", "FETCH_HEAD"]).await?;
        Ok(())
    }

    async fn clone_and_checkout(&self, repo_url: &str, commit: &str, dest: &Path) -> Result<(), GitError> {
        let mut command = self.command();
        command.args(["clone", "--no-tags", "--no-checkout", "--"]).arg(repo_url).arg(dest);
        let output = self.run(command, "clone").await?;
        check_git_output(&output, "git clone")?;

        self.query(dest, &["checkout", "--quiet", commit]).await?;
        Ok(())
    }

    /// URL of the `origin` remote of the repository at `repo`.
    pub async fn remote_url(&self, repo: &Path) -> Result<String, GitError> {
        self.query(repo, &["remote", "get-url", "origin"]).await
    }

    /// Commit hash `HEAD` points at.
    pub async fn head_commit(&self, repo: &Path) -> Result<String, GitError> {
        self.query(repo, &["rev-parse", "HEAD"]).await
    }

    async fn query(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        let mut command = self.command();
        command.arg("-C").arg(repo).args(args);
        let operation = format!("git {}", args.join(" "));
        let output = self.run(command, &args.join(" ")).await?;
        check_git_output(&output, &operation)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        command
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, mut command: Command, description: &str) -> Result<Output, GitError> {
        let child = command.spawn().map_err(GitError::Spawn)?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GitError::Spawn(e)),
            Err(_) => Err(GitError::Timeout {
                command: description.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Abbreviated or full hexadecimal commit id.
fn is_commit_hash(s: &str) -> bool {
    (7..=64).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// SHA-1 or SHA-256 object id.
fn is_full_commit_hash(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && is_commit_hash(s)
}

fn check_git_output(output: &Output, operation: &str) -> Result<(), GitError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::Failed {
            operation: operation.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(())
}
