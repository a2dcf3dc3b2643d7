//! Layered configuration: backend defaults -> global -> project -> flags

use std::collections::BTreeMap;
use std::path::Path;

use super::expand::{expand_dir, expand_env_map, expand_file_mounts};
use super::load::{load_global_config, load_project_config};
use super::request::BackendConfig;
use super::types::{FileMount, GlobalConfig, ProjectConfig, Resources};
use super::ConfigError;

/// Command-line overrides; `None` leaves the configured value in place
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub backend: Option<String>,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub disk: Option<String>,
}

impl FlagOverrides {
    fn resources(&self) -> Resources {
        Resources {
            cpus: self.cpus,
            memory: self.memory.clone(),
            disk: self.disk.clone(),
        }
    }
}

/// Fully merged and expanded configuration for one creation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub backend: BackendConfig,
    pub branch_prefix: String,
    pub environment: BTreeMap<String, String>,
    pub files: Vec<FileMount>,
    pub setup_commands: Vec<String>,
}

/// Merge already-loaded files. `project_dir` anchors relative mount sources.
pub fn merge(
    global: &GlobalConfig,
    project: &ProjectConfig,
    project_dir: &Path,
    flags: &FlagOverrides,
) -> Result<ResolvedConfig, ConfigError> {
    let name = flags
        .backend
        .clone()
        .unwrap_or_else(|| global.default_backend.clone());
    let settings = global
        .backends
        .get(&name)
        .ok_or_else(|| ConfigError::UnknownBackend(name.clone()))?;

    let mut resources = Resources {
        cpus: settings.cpus,
        memory: settings.memory.clone(),
        disk: settings.disk.clone(),
    };
    resources.overlay(&project.resources);
    resources.overlay(&flags.resources());

    Ok(ResolvedConfig {
        backend: BackendConfig {
            name,
            backend_type: settings.backend_type.clone(),
            resources,
            workspace_root: settings.workspace_root.as_deref().map(expand_dir),
        },
        branch_prefix: project.branch_prefix.clone(),
        environment: expand_env_map(&project.env)?,
        files: expand_file_mounts(&project.files, project_dir),
        setup_commands: project.setup.clone(),
    })
}

/// Load the global file and the project file nearest `start`, then merge
pub fn resolve(start: &Path, flags: &FlagOverrides) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let (project, project_dir) = load_project_config(start)?;
    merge(&global, &project, &project_dir, flags)
}
