//! Backends - execution substrates behind one lifecycle contract
//!
//! Every substrate implements the full `Backend` trait. Operations that mean
//! nothing for a substrate (starting a worktree, say) succeed without doing
//! anything, so callers never branch on the substrate type.
//!
//! - registry: backend type name -> constructor
//! - worktree: git worktree substrate and its host setup runner

pub mod registry;
pub mod worktree;

pub use registry::{BackendFactory, BackendRegistry};
pub use worktree::{HostSetupRunner, WorktreeBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{CreateRequest, FileMount};
use crate::git::GitError;
use crate::util::process::ProcessError;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("workspace already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("workspace not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unknown backend type: {0}")]
    UnknownType(String),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Setup(#[from] SetupError),
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("work directory not set")]
    WorkDirNotSet,
    #[error("invalid environment variable name: {0:?}")]
    InvalidVariableName(String),
    #[error("failed to write environment file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("mount source not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("failed to mount {} at {}: {source}", source_path.display(), target.display())]
    Mount {
        source_path: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("setup command {index} failed (exit {exit_code:?}): {command}\n{output}")]
    CommandFailed {
        /// 1-based position in the command list
        index: usize,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
    #[error("setup command {index} could not run: {source}")]
    CommandSpawn {
        index: usize,
        #[source]
        source: ProcessError,
    },
}

/// Observed state of a workspace, queried live and never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    Running,
    Stopped,
    Creating,
    Stopping,
    Starting,
    Destroying,
    NotFound,
    Error,
}

impl WorkspaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceState::Running => "running",
            WorkspaceState::Stopped => "stopped",
            WorkspaceState::Creating => "creating",
            WorkspaceState::Stopping => "stopping",
            WorkspaceState::Starting => "starting",
            WorkspaceState::Destroying => "destroying",
            WorkspaceState::NotFound => "not_found",
            WorkspaceState::Error => "error",
        }
    }
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub state: WorkspaceState,
    pub message: String,
}

impl BackendStatus {
    pub fn new(state: WorkspaceState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Result of `Backend::exec`; a non-zero exit is not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout and stderr interleaved
    pub output: String,
    /// -1 when the command was killed by a signal
    pub exit_code: i32,
}

/// What a setup runner applies to a fresh workspace, in this order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupConfig {
    pub environment: BTreeMap<String, String>,
    pub files: Vec<FileMount>,
    pub commands: Vec<String>,
}

impl SetupConfig {
    pub fn is_empty(&self) -> bool {
        self.environment.is_empty() && self.files.is_empty() && self.commands.is_empty()
    }
}

impl From<&CreateRequest> for SetupConfig {
    fn from(request: &CreateRequest) -> Self {
        Self {
            environment: request.environment.clone(),
            files: request.files.clone(),
            commands: request.setup_commands.clone(),
        }
    }
}

/// Provisions one workspace. Each backend knows how setup runs on its
/// substrate; the caller only hands over the configuration.
#[async_trait]
pub trait SetupRunner: Send + Sync {
    async fn run(&self, config: &SetupConfig) -> Result<(), SetupError>;
}

/// Lifecycle contract shared by every substrate.
///
/// All operations may wait on external processes. Dropping the returned
/// future cancels the operation and kills whatever process it was waiting on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry key of this substrate
    fn kind(&self) -> &'static str;

    /// Provision a workspace and return its backend id. Either the workspace
    /// exists in full afterwards or nothing was left behind.
    async fn create(&self, request: &CreateRequest) -> Result<String, BackendError>;

    /// Setup runner bound to an existing workspace
    fn setup_runner(&self, backend_id: &str) -> Box<dyn SetupRunner>;

    async fn start(&self, backend_id: &str) -> Result<(), BackendError>;

    async fn stop(&self, backend_id: &str) -> Result<(), BackendError>;

    async fn destroy(&self, backend_id: &str) -> Result<(), BackendError>;

    /// Undo a `create` whose result the caller cannot keep. Unlike `destroy`,
    /// this also drops anything `create` made outside the workspace.
    async fn discard(&self, request: &CreateRequest, backend_id: &str) -> Result<(), BackendError> {
        let _ = request;
        self.destroy(backend_id).await
    }

    /// Interactive session attached to the caller's terminal; returns the
    /// session's exit code once it ends
    async fn shell(&self, backend_id: &str) -> Result<i32, BackendError>;

    async fn exec(&self, backend_id: &str, command: &str) -> Result<ExecOutput, BackendError>;

    /// Missing workspaces are reported as `NotFound`, never as an error
    async fn status(&self, backend_id: &str) -> BackendStatus;

    /// Backend ids of every workspace this system manages on the substrate
    async fn list(&self) -> Result<Vec<String>, BackendError>;
}
