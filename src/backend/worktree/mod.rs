//! Worktree backend
//!
//! Each workspace is a linked git worktree at `<root>/arbor-<short id>/` on a
//! fresh branch. `<root>` is the configured `workspace_root`, or the
//! repository's parent directory. The backend id is the workspace's absolute
//! path, so every operation other than `create` needs nothing else.
//!
//! There is no process or network isolation: workspaces share the host's
//! tools and credentials. Start and stop have nothing to do.

mod setup;

pub use setup::HostSetupRunner;

use async_trait::async_trait;
use tokio::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{Backend, BackendError, BackendStatus, ExecOutput, SetupRunner, WorkspaceState};
use crate::config::{BackendConfig, CreateRequest};
use crate::git;
use crate::util::process::{self, run_captured, run_interactive};
use crate::util::shell::{self, POSIX_SHELL};
use crate::state::short_id;

/// Registry key
pub const BACKEND_TYPE: &str = "worktree";

/// Marks a directory as created and owned by arbor
pub const MARKER_FILE: &str = ".arbor-workspace";

/// Shell-sourceable environment written during setup
pub const ENV_FILE: &str = ".arbor-env";

/// Directory name prefix of every managed workspace
pub const WORKSPACE_PREFIX: &str = "arbor-";

#[derive(Debug, Clone, Default)]
pub struct WorktreeBackend {
    workspace_root: Option<PathBuf>,
    /// Repository whose worktrees `list` enumerates; the repository containing
    /// the current directory when unset
    repository: Option<PathBuf>,
}

impl WorktreeBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repo: impl Into<PathBuf>) -> Self {
        self.repository = Some(repo.into());
        self
    }

    /// Where the workspace for `id` lives
    pub fn workspace_path(&self, repo: &Path, id: &str) -> PathBuf {
        let root = match &self.workspace_root {
            Some(root) => root.clone(),
            None => repo
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| repo.to_path_buf()),
        };
        root.join(format!("{}{}", WORKSPACE_PREFIX, short_id(id)))
    }

    async fn list_repository(&self) -> Result<PathBuf, BackendError> {
        if let Some(repo) = &self.repository {
            return Ok(repo.clone());
        }
        let cwd = std::env::current_dir().map_err(|source| BackendError::Io {
            action: "read current directory",
            path: PathBuf::from("."),
            source,
        })?;
        Ok(git::main_repo_root(&cwd).await?)
    }
}

/// `env_id: <id>\ncreated_by: arbor\n`
fn marker_contents(id: &str) -> String {
    format!("env_id: {id}\ncreated_by: arbor\n")
}

/// Environment id recorded in a marker file
pub fn parse_marker(contents: &str) -> Option<&str> {
    contents
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "env_id")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Named like a managed workspace and carrying the marker
pub fn is_managed(path: &Path) -> bool {
    let named = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with(WORKSPACE_PREFIX))
        .unwrap_or(false);
    named && path.join(MARKER_FILE).is_file()
}

/// The workspace's export artifact, if setup wrote one
fn env_file(workspace: &Path) -> Option<PathBuf> {
    let path = workspace.join(ENV_FILE);
    path.is_file().then_some(path)
}

fn require_workspace(backend_id: &str) -> Result<PathBuf, BackendError> {
    let path = PathBuf::from(backend_id);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(BackendError::NotFound(path))
    }
}

async fn remove_dir(path: &Path) -> Result<(), BackendError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BackendError::Io {
            action: "remove workspace",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl Backend for WorktreeBackend {
    fn kind(&self) -> &'static str {
        BACKEND_TYPE
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, BackendError> {
        if request.id.is_empty() {
            return Err(BackendError::InvalidRequest(
                "environment ID is required".to_string(),
            ));
        }
        if request.repository.path.as_os_str().is_empty() {
            return Err(BackendError::InvalidRequest(
                "repository path is required".to_string(),
            ));
        }
        if !request.backend.resources.is_empty() {
            warn!(
                backend = %request.backend.name,
                "worktree backend ignores resource settings (cpus, memory, disk)"
            );
        }

        let repo = &request.repository.path;
        let path = self.workspace_path(repo, &request.id);
        if fs::symlink_metadata(&path).await.is_ok() {
            return Err(BackendError::AlreadyExists(path));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| BackendError::Io {
                action: "create workspace root",
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Keeps `git config --worktree` inside the workspace that ran it.
        git::enable_worktree_config(repo).await?;

        let branch = request.branch_name();
        git::add_worktree(repo, &path, &branch, request.base_ref()).await?;
        info!(
            env_id = %request.id,
            path = %path.display(),
            branch = %branch,
            "Worktree created"
        );

        let marker = path.join(MARKER_FILE);
        if let Err(source) = fs::write(&marker, marker_contents(&request.id)).await {
            let backend_id = path.to_string_lossy().into_owned();
            if let Err(e) = self.discard(request, &backend_id).await {
                warn!(path = %path.display(), error = %e, "Failed to clean up worktree");
            }
            return Err(BackendError::Io {
                action: "write marker file",
                path: marker,
                source,
            });
        }

        Ok(path.to_string_lossy().into_owned())
    }

    fn setup_runner(&self, backend_id: &str) -> Box<dyn SetupRunner> {
        Box::new(HostSetupRunner::new(backend_id))
    }

    async fn start(&self, _backend_id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn stop(&self, _backend_id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn destroy(&self, backend_id: &str) -> Result<(), BackendError> {
        let path = PathBuf::from(backend_id);
        if fs::symlink_metadata(&path).await.is_err() {
            debug!(path = %path.display(), "Workspace already gone");
            return Ok(());
        }

        let repo = match git::main_repo_root(&path).await {
            Ok(repo) => repo,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No owning repository, removing directory");
                return remove_dir(&path).await;
            }
        };

        if let Err(e) = git::remove_worktree(&repo, &path).await {
            warn!(
                path = %path.display(),
                error = %e,
                "git worktree remove failed, removing directory"
            );
            remove_dir(&path).await?;
            if let Err(e) = git::prune_worktrees(&repo).await {
                warn!(repo = %repo.display(), error = %e, "git worktree prune failed");
            }
        }
        info!(path = %path.display(), "Worktree removed");
        Ok(())
    }

    /// Destroy, then delete the branch `create` made. A user-initiated
    /// `destroy` keeps the branch so no commits are lost; a rolled-back create
    /// has none worth keeping.
    async fn discard(&self, request: &CreateRequest, backend_id: &str) -> Result<(), BackendError> {
        self.destroy(backend_id).await?;
        let branch = request.branch_name();
        git::delete_branch(&request.repository.path, &branch).await?;
        info!(branch = %branch, "Branch deleted");
        Ok(())
    }

    async fn shell(&self, backend_id: &str) -> Result<i32, BackendError> {
        let path = require_workspace(backend_id)?;
        let login = shell::login_shell();

        // The export artifact is POSIX, so sh sources it and hands over.
        let cmd = match env_file(&path) {
            Some(env) => process::shell_command(
                POSIX_SHELL,
                &path,
                &format!(
                    ". {} || exit 1\nexec {}\n",
                    shell::quote(&env.to_string_lossy()),
                    shell::quote(&login)
                ),
            ),
            None => {
                let mut cmd = tokio::process::Command::new(&login);
                cmd.current_dir(&path);
                cmd
            }
        };

        let status = run_interactive(cmd).await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn exec(&self, backend_id: &str, command: &str) -> Result<ExecOutput, BackendError> {
        let path = require_workspace(backend_id)?;
        let script = shell::sourced_script(env_file(&path).as_deref(), command);
        let output = run_captured(process::shell_command(POSIX_SHELL, &path, &script)).await?;

        Ok(ExecOutput {
            output: format!("{}{}", output.stdout, output.stderr),
            exit_code: output.exit_code.unwrap_or(-1),
        })
    }

    async fn status(&self, backend_id: &str) -> BackendStatus {
        let path = Path::new(backend_id);
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return BackendStatus::new(
                    WorkspaceState::NotFound,
                    "worktree directory does not exist",
                )
            }
            Err(e) => {
                return BackendStatus::new(
                    WorkspaceState::Error,
                    format!("failed to stat worktree: {e}"),
                )
            }
        };

        if !metadata.is_dir() {
            return BackendStatus::new(WorkspaceState::Error, "path exists but is not a directory");
        }
        if !path.join(MARKER_FILE).is_file() {
            return BackendStatus::new(
                WorkspaceState::Error,
                "directory exists but is not an arbor-managed worktree",
            );
        }
        BackendStatus::new(WorkspaceState::Running, "worktree is ready")
    }

    async fn list(&self) -> Result<Vec<String>, BackendError> {
        let repo = self.list_repository().await?;
        let worktrees = git::list_worktrees(&repo).await?;
        Ok(worktrees
            .into_iter()
            .filter(|path| is_managed(path))
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_marker_round_trip() {
        let contents = marker_contents("abc123");
        assert_eq!(parse_marker(&contents), Some("abc123"));
        assert_eq!(parse_marker("created_by: arbor\n"), None);
        assert_eq!(parse_marker("env_id:\n"), None);
    }

    #[test]
    fn test_workspace_path() {
        let backend = WorktreeBackend::default();
        assert_eq!(
            backend.workspace_path(Path::new("/src/app"), "abc123def456abc123def456abc12345"),
            PathBuf::from("/src/arbor-abc123def456")
        );

        let rooted = WorktreeBackend::new(&BackendConfig {
            workspace_root: Some(PathBuf::from("/scratch")),
            ..BackendConfig::new("local", BACKEND_TYPE)
        });
        assert_eq!(
            rooted.workspace_path(Path::new("/src/app"), "abc123def456abc123def456abc12345"),
            PathBuf::from("/scratch/arbor-abc123def456")
        );
    }

    #[test]
    fn test_is_managed_needs_prefix_and_marker() {
        let dir = TempDir::new().unwrap();
        let managed = dir.path().join("arbor-0123456789ab");
        let unmarked = dir.path().join("arbor-ba9876543210");
        let foreign = dir.path().join("feature-x");
        for path in [&managed, &unmarked, &foreign] {
            fs::create_dir(path).unwrap();
        }
        fs::write(managed.join(MARKER_FILE), marker_contents("0123456789ab")).unwrap();
        fs::write(foreign.join(MARKER_FILE), marker_contents("0123456789ab")).unwrap();

        assert!(is_managed(&managed));
        assert!(!is_managed(&unmarked));
        assert!(!is_managed(&foreign));
    }

    #[tokio::test]
    async fn test_status_without_marker_is_error() {
        let dir = TempDir::new().unwrap();
        let backend = WorktreeBackend::default();
        let id = dir.path().to_string_lossy().into_owned();

        assert_eq!(backend.status(&id).await.state, WorkspaceState::Error);

        fs::write(dir.path().join(MARKER_FILE), marker_contents("abc")).unwrap();
        assert_eq!(backend.status(&id).await.state, WorkspaceState::Running);

        let missing = dir.path().join("gone").to_string_lossy().into_owned();
        assert_eq!(backend.status(&missing).await.state, WorkspaceState::NotFound);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_no_ops() {
        let backend = WorktreeBackend::default();
        backend.start("/nonexistent/arbor-000000000000").await.unwrap();
        backend.stop("/nonexistent/arbor-000000000000").await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_sources_env_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(ENV_FILE), "export GREETING='hello there'\n").unwrap();
        let backend = WorktreeBackend::default();
        let id = dir.path().to_string_lossy().into_owned();

        let result = backend
            .exec(&id, "echo \"$GREETING\"; echo oops >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "hello there\noops\n");
    }

    #[tokio::test]
    async fn test_exec_in_missing_workspace() {
        let backend = WorktreeBackend::default();
        assert!(matches!(
            backend.exec("/nonexistent/arbor-000000000000", "true").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_plain_directory() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("arbor-0123456789ab");
        fs::create_dir(&workspace).unwrap();
        fs::write(workspace.join(MARKER_FILE), marker_contents("0123456789ab")).unwrap();

        let backend = WorktreeBackend::default();
        let id = workspace.to_string_lossy().into_owned();
        backend.destroy(&id).await.unwrap();
        assert!(!workspace.exists());
        // Destroying again finds nothing to do
        backend.destroy(&id).await.unwrap();
    }
}
