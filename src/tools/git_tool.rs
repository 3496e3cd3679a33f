use crate::config::Config;
use crate::error::AppError;
use crate::utils::path_utils::absolute_path;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio as StdProcessStdio;
use std::sync::Arc;
use tokio::process::Command as TokioCommand;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitFileStatus {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    /// Two-letter porcelain code, e.g. "M ", " M", "??".
    pub status: String,
    pub staged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub files: Vec<GitFileStatus>,
}

/// Parses `git status --porcelain=v1 -b -z` output.
pub fn parse_porcelain(output: &str) -> GitStatus {
    let mut status = GitStatus { branch: None, upstream: None, files: Vec::new() };
    let mut records = output.split('\0').filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if let Some(header) = record.strip_prefix("## ") {
            let header = header.strip_prefix("No commits yet on ").unwrap_or(header);
            let header = header.split(" [").next().unwrap_or(header);
            match header.split_once("...") {
                Some((branch, upstream)) => {
                    status.branch = Some(branch.to_string());
                    status.upstream = Some(upstream.to_string());
                }
                None => status.branch = Some(header.to_string()),
            }
            continue;
        }
        if record.len() < 4 || !record.is_char_boundary(2) {
            debug!(record = %record, "Skipping malformed porcelain record");
            continue;
        }
        let (code, path) = (&record[..2], &record[3..]);
        let x = code.chars().next().unwrap_or(' ');
        // Renames and copies carry the source path as the next record.
        let original_path = if matches!(x, 'R' | 'C') {
            records.next().map(str::to_string)
        } else {
            None
        };
        status.files.push(GitFileStatus {
            path: path.to_string(),
            original_path,
            status: code.to_string(),
            staged: x != ' ' && x != '?',
        });
    }
    status
}

/// Runs git in a working directory on behalf of the UI.
#[derive(Debug)]
pub struct GitManager {
    config: Arc<Config>,
}

impl GitManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn git_binary(&self) -> Result<PathBuf, AppError> {
        self.config
            .git_path
            .clone()
            .ok_or_else(|| AppError::GitError("git executable not found".to_string()))
    }

    async fn run(&self, cwd: &str, args: &[&str]) -> Result<String, AppError> {
        let cwd = absolute_path(cwd)?;
        let git = self.git_binary()?;
        debug!(cwd = %cwd.display(), args = ?args, "Running git");

        let output = TokioCommand::new(&git)
            .args(args)
            .current_dir(&cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(StdProcessStdio::null())
            .output()
            .await
            .map_err(|e| AppError::SpawnFailed(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(args = ?args, code = ?output.status.code(), stderr = %stderr, "git command failed");
            let message = if stderr.is_empty() {
                format!("git {} exited with {}", args.join(" "), output.status)
            } else {
                stderr
            };
            return Err(AppError::GitError(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    #[instrument(skip(self))]
    pub async fn status(&self, cwd: &str) -> Result<GitStatus, AppError> {
        let out = self.run(cwd, &["status", "--porcelain=v1", "-b", "-z"]).await?;
        Ok(parse_porcelain(&out))
    }

    #[instrument(skip(self))]
    pub async fn stage(&self, cwd: &str, path: &str) -> Result<(), AppError> {
        self.run(cwd, &["add", "--", path]).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn unstage(&self, cwd: &str, path: &str) -> Result<(), AppError> {
        match self.run(cwd, &["restore", "--staged", "--", path]).await {
            Ok(_) => Ok(()),
            Err(AppError::GitError(message)) => {
                // Without a HEAD commit there is nothing to restore from.
                if self.has_head(cwd).await {
                    return Err(AppError::GitError(message));
                }
                self.run(cwd, &["rm", "--cached", "-r", "-q", "--", path]).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn has_head(&self, cwd: &str) -> bool {
        self.run(cwd, &["rev-parse", "--verify", "-q", "HEAD"]).await.is_ok()
    }

    #[instrument(skip(self, message))]
    pub async fn commit(&self, cwd: &str, message: &str) -> Result<(), AppError> {
        if message.trim().is_empty() {
            return Err(AppError::InvalidInputArgument("Commit message must not be empty".to_string()));
        }
        self.run(cwd, &["commit", "-m", message]).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn push(&self, cwd: &str) -> Result<(), AppError> {
        self.run(cwd, &["push"]).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn pull(&self, cwd: &str) -> Result<(), AppError> {
        self.run(cwd, &["pull"]).await.map(|_| ())
    }
}
