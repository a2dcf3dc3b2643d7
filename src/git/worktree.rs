//! Worktree primitives

use std::path::{Path, PathBuf};

use super::{run, GitError};

/// `git worktree add -b <branch> <path> <base>`
pub async fn add_worktree(
    repo_root: &Path,
    path: &Path,
    branch: &str,
    base: &str,
) -> Result<(), GitError> {
    let path = path.to_string_lossy().into_owned();
    run(repo_root, &["worktree", "add", "-b", branch, path.as_str(), base]).await?;
    Ok(())
}

/// `git worktree remove --force <path>`
pub async fn remove_worktree(repo_root: &Path, path: &Path) -> Result<(), GitError> {
    let path = path.to_string_lossy().into_owned();
    run(repo_root, &["worktree", "remove", "--force", path.as_str()]).await?;
    Ok(())
}

/// `git branch -D <branch>`
pub async fn delete_branch(repo_root: &Path, branch: &str) -> Result<(), GitError> {
    run(repo_root, &["branch", "-D", branch]).await?;
    Ok(())
}

/// Drop administrative entries for worktrees whose directories are gone
pub async fn prune_worktrees(repo_root: &Path) -> Result<(), GitError> {
    run(repo_root, &["worktree", "prune"]).await?;
    Ok(())
}

/// Paths of every worktree of the repository, main working tree included
pub async fn list_worktrees(repo_root: &Path) -> Result<Vec<PathBuf>, GitError> {
    let output = run(repo_root, &["worktree", "list", "--porcelain"]).await?;
    Ok(parse_worktree_list(&output))
}

/// Turn on `extensions.worktreeConfig` so `git config --worktree` writes to a
/// per-worktree file instead of the shared repository config.
pub async fn enable_worktree_config(repo_root: &Path) -> Result<(), GitError> {
    run(repo_root, &["config", "extensions.worktreeConfig", "true"]).await?;
    Ok(())
}

/// Parse `git worktree list --porcelain`.
///
/// Records are separated by blank lines; each starts with `worktree <path>`.
pub fn parse_worktree_list(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect()
}
