//! Configuration file schemas

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Backend used when neither the global file nor a flag picks one
pub const DEFAULT_BACKEND: &str = "local";

/// Backend type used when a `[backends.<name>]` table omits `type`
pub const DEFAULT_BACKEND_TYPE: &str = "worktree";

/// Branch prefix used when the project file omits `branch_prefix`
pub const DEFAULT_BRANCH_PREFIX: &str = "env/";

/// Global configuration from `<config_dir>/arbor/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_backend")]
    pub default_backend: String,
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, BackendSettings>,
}

fn default_version() -> u32 {
    1
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_backends() -> BTreeMap<String, BackendSettings> {
    BTreeMap::from([(DEFAULT_BACKEND.to_string(), BackendSettings::default())])
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_backend: default_backend(),
            backends: default_backends(),
        }
    }
}

/// One `[backends.<name>]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    /// Directory that receives managed workspaces; the repository's parent
    /// directory when unset
    pub workspace_root: Option<String>,
}

fn default_backend_type() -> String {
    DEFAULT_BACKEND_TYPE.to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            cpus: None,
            memory: None,
            disk: None,
            workspace_root: None,
        }
    }
}

/// Resource hints; substrates without resource control ignore them
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub disk: Option<String>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.cpus.is_none() && self.memory.is_none() && self.disk.is_none()
    }

    /// Fields set in `other` replace ours
    pub fn overlay(&mut self, other: &Resources) {
        if other.cpus.is_some() {
            self.cpus = other.cpus;
        }
        if other.memory.is_some() {
            self.memory = other.memory.clone();
        }
        if other.disk.is_some() {
            self.disk = other.disk.clone();
        }
    }
}

/// Project configuration from `.arbor.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub files: Vec<FileMount>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
}

fn default_branch_prefix() -> String {
    DEFAULT_BRANCH_PREFIX.to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            branch_prefix: default_branch_prefix(),
            env: BTreeMap::new(),
            files: Vec::new(),
            setup: Vec::new(),
            resources: Resources::default(),
        }
    }
}

/// A value in the project's `[env]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvValue {
    /// `NAME = "value"`, `${VAR}` and `${VAR:-default}` are expanded
    Literal(String),
    /// `NAME = { from_file = "~/.secrets/token" }`
    FromFile { from_file: String },
}

/// A file or directory placed into the workspace during setup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMount {
    pub source: PathBuf,
    /// Absolute, or relative to the workspace root
    pub target: PathBuf,
    /// Symlink to the source instead of copying it
    #[serde(default)]
    pub readonly: bool,
}
