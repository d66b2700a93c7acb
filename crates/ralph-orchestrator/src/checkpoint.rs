//! Git checkpoints, rollback, and prompt archival

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use ralph_core::{RalphError, Result};

/// Wraps the git surface the driver uses plus timestamped prompt archival.
pub struct CheckpointManager {
    archive_dir: PathBuf,
    /// Repository to operate on; `None` means the process working
    /// directory.
    repo_dir: Option<PathBuf>,
}

impl CheckpointManager {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            repo_dir: None,
        }
    }

    /// Pin git operations to an explicit repository directory.
    pub fn with_repo_dir(mut self, repo_dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = Some(repo_dir.into());
        self
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Stage everything and commit a checkpoint for `iteration`.
    ///
    /// Failures (not a repo, nothing to commit) are reported as errors for
    /// the caller to log; the run continues either way.
    pub async fn create_checkpoint(&self, iteration: u64) -> Result<()> {
        self.run_git(&["add", "-A"]).await?;
        self.run_git(&["commit", "-m", &format!("Ralph checkpoint {iteration}")])
            .await?;
        debug!(iteration, "created git checkpoint");
        Ok(())
    }

    /// Drop back to the previous checkpoint.
    pub async fn rollback(&self) -> Result<()> {
        self.run_git(&["reset", "--hard", "HEAD~1"]).await?;
        debug!("rolled back to previous checkpoint");
        Ok(())
    }

    /// Copy the prompt file into the archive as
    /// `prompt_<YYYYmmdd_HHMMSS>.md`.
    pub async fn archive_prompt(&self, prompt_file: &Path) -> Result<PathBuf> {
        if !prompt_file.exists() {
            return Err(RalphError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("prompt file not found: {}", prompt_file.display()),
            )));
        }

        tokio::fs::create_dir_all(&self.archive_dir).await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let archive_path = self.archive_dir.join(format!("prompt_{timestamp}.md"));
        tokio::fs::copy(prompt_file, &archive_path).await?;

        debug!(path = %archive_path.display(), "archived prompt");
        Ok(archive_path)
    }

    async fn run_git(&self, args: &[&str]) -> Result<()> {
        let mut command = Command::new("git");
        if let Some(repo_dir) = &self.repo_dir {
            command.arg("-C").arg(repo_dir);
        }
        let output = command.args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, %stderr, "git command failed");
            return Err(RalphError::Application {
                code: output.status.code().unwrap_or(-1) as i64,
                message: format!("git {} failed: {}", args.join(" "), stderr.trim()),
            });
        }
        Ok(())
    }
}
