// Git module - thin wrappers over the git CLI
//
// - repo: repository discovery (root, common dir, remote, current branch)
// - worktree: worktree primitives used by the worktree backend

pub mod repo;
pub mod worktree;

pub use repo::*;
pub use worktree::*;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::process::{self, ProcessError};

#[derive(Error, Debug)]
pub enum GitError {
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),
    #[error("repository is in detached HEAD state")]
    DetachedHead,
    #[error("no remote named {0}")]
    NoRemote(String),
    #[error("git {args} failed (exit {exit_code:?}): {output}")]
    CommandFailed {
        args: String,
        exit_code: Option<i32>,
        output: String,
    },
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Run `git <args>` in `dir` and return trimmed stdout.
///
/// A non-zero exit becomes `GitError::CommandFailed` carrying stdout and stderr.
pub(crate) async fn run(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = process::run_captured(process::git_command(dir, args)).await?;
    if !output.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            exit_code: output.exit_code,
            output: output.combined(),
        });
    }
    Ok(output.stdout.trim().to_string())
}
