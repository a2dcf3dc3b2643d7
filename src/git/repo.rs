//! Repository discovery

use std::path::{Path, PathBuf};

use super::{run, GitError};
use crate::util::process;

/// Root of the working tree containing `dir`
pub async fn repo_root(dir: &Path) -> Result<PathBuf, GitError> {
    match run(dir, &["rev-parse", "--show-toplevel"]).await {
        Ok(root) => Ok(PathBuf::from(root)),
        Err(GitError::CommandFailed { .. }) => Err(GitError::NotARepository(dir.to_path_buf())),
        Err(e) => Err(e),
    }
}

/// Root of the main repository owning `dir`, which may be a linked worktree.
///
/// `--git-common-dir` points at the main repository's `.git` directory, either
/// absolute or relative to `dir`; its parent is the main working tree.
pub async fn main_repo_root(dir: &Path) -> Result<PathBuf, GitError> {
    let common = match run(dir, &["rev-parse", "--git-common-dir"]).await {
        Ok(common) => PathBuf::from(common),
        Err(GitError::CommandFailed { .. }) => {
            return Err(GitError::NotARepository(dir.to_path_buf()))
        }
        Err(e) => return Err(e),
    };
    let common = if common.is_absolute() {
        common
    } else {
        dir.join(common)
    };
    common
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| GitError::NotARepository(dir.to_path_buf()))
}

/// URL of `remote` (usually `origin`)
pub async fn remote_url(dir: &Path, remote: &str) -> Result<String, GitError> {
    match run(dir, &["remote", "get-url", remote]).await {
        Ok(url) => Ok(url),
        Err(GitError::CommandFailed { .. }) => Err(GitError::NoRemote(remote.to_string())),
        Err(e) => Err(e),
    }
}

/// Short name of the checked-out branch
pub async fn current_branch(dir: &Path) -> Result<String, GitError> {
    let output =
        process::run_captured(process::git_command(dir, &["symbolic-ref", "--short", "-q", "HEAD"]))
            .await?;
    match output.exit_code {
        Some(0) => Ok(output.stdout.trim().to_string()),
        // symbolic-ref -q exits 1 without output when HEAD is not a symbolic ref
        Some(1) => Err(GitError::DetachedHead),
        _ => Err(GitError::NotARepository(dir.to_path_buf())),
    }
}
