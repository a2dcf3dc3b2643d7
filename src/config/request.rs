//! The resolved creation request consumed by backends

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::merge::ResolvedConfig;
use super::types::{FileMount, Resources, DEFAULT_BRANCH_PREFIX};
use super::ConfigError;
use crate::state::short_id;

/// Selected backend: its configured name, its type and its settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name of the `[backends.<name>]` table, recorded on the environment
    pub name: String,
    /// Registry key (e.g. "worktree")
    pub backend_type: String,
    pub resources: Resources,
    pub workspace_root: Option<PathBuf>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type: backend_type.into(),
            resources: Resources::default(),
            workspace_root: None,
        }
    }
}

/// The repository a workspace is cut from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Root of the main working tree
    pub path: PathBuf,
    pub remote_url: Option<String>,
    /// Ref the new branch starts from
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub id: String,
    pub backend: BackendConfig,
    pub repository: RepositoryInfo,
    pub branch_prefix: String,
    /// Sorted so the export artifact is deterministic
    pub environment: BTreeMap<String, String>,
    pub files: Vec<FileMount>,
    pub setup_commands: Vec<String>,
}

impl CreateRequest {
    /// Combine merged configuration, repository and environment id.
    ///
    /// Rejects an empty id, an empty repository path and mounts with an empty
    /// source or target.
    pub fn new(
        resolved: ResolvedConfig,
        repository: RepositoryInfo,
        id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ConfigError::InvalidRequest(
                "environment ID is required".to_string(),
            ));
        }
        if repository.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidRequest(
                "repository path is required".to_string(),
            ));
        }
        for (i, mount) in resolved.files.iter().enumerate() {
            if mount.source.as_os_str().is_empty() || mount.target.as_os_str().is_empty() {
                return Err(ConfigError::InvalidRequest(format!(
                    "file mount {}: source and target are required",
                    i + 1
                )));
            }
        }

        Ok(Self {
            id,
            backend: resolved.backend,
            repository,
            branch_prefix: resolved.branch_prefix,
            environment: resolved.environment,
            files: resolved.files,
            setup_commands: resolved.setup_commands,
        })
    }

    /// `<branch_prefix><short id>`
    pub fn branch_name(&self) -> String {
        let prefix = if self.branch_prefix.is_empty() {
            DEFAULT_BRANCH_PREFIX
        } else {
            &self.branch_prefix
        };
        format!("{}{}", prefix, short_id(&self.id))
    }

    /// Base ref, `HEAD` when none was given
    pub fn base_ref(&self) -> &str {
        if self.repository.base_branch.is_empty() {
            "HEAD"
        } else {
            &self.repository.base_branch
        }
    }

    /// Whether a setup runner has anything to do
    pub fn has_setup_work(&self) -> bool {
        !self.environment.is_empty() || !self.files.is_empty() || !self.setup_commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedConfig {
        ResolvedConfig {
            backend: BackendConfig::new("local", "worktree"),
            branch_prefix: "env/".to_string(),
            environment: BTreeMap::new(),
            files: Vec::new(),
            setup_commands: Vec::new(),
        }
    }

    fn repo() -> RepositoryInfo {
        RepositoryInfo {
            path: PathBuf::from("/src/app"),
            remote_url: None,
            base_branch: "main".to_string(),
        }
    }

    #[test]
    fn test_branch_name_uses_short_id() {
        let request =
            CreateRequest::new(resolved(), repo(), "abc123def456abc123def456abc12345").unwrap();
        assert_eq!(request.branch_name(), "env/abc123def456");

        let mut custom = request.clone();
        custom.branch_prefix = "agent/".to_string();
        assert_eq!(custom.branch_name(), "agent/abc123def456");
        custom.branch_prefix.clear();
        assert_eq!(custom.branch_name(), "env/abc123def456");
    }

    #[test]
    fn test_rejects_missing_fields() {
        assert!(matches!(
            CreateRequest::new(resolved(), repo(), ""),
            Err(ConfigError::InvalidRequest(_))
        ));

        let mut no_path = repo();
        no_path.path = PathBuf::new();
        assert!(matches!(
            CreateRequest::new(resolved(), no_path, "abc"),
            Err(ConfigError::InvalidRequest(_))
        ));

        let mut bad_mount = resolved();
        bad_mount.files.push(FileMount {
            source: PathBuf::from("/etc/hosts"),
            target: PathBuf::new(),
            readonly: true,
        });
        assert!(matches!(
            CreateRequest::new(bad_mount, repo(), "abc"),
            Err(ConfigError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_base_ref_defaults_to_head() {
        let mut repository = repo();
        repository.base_branch.clear();
        let request = CreateRequest::new(resolved(), repository, "abc").unwrap();
        assert_eq!(request.base_ref(), "HEAD");
        assert!(!request.has_setup_work());
    }
}
