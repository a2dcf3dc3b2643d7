//! Locating and parsing configuration files

use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{GlobalConfig, ProjectConfig};
use super::ConfigError;
use crate::util::paths;

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = ".arbor.toml";

/// `<config_dir>/arbor/config.toml`
pub fn global_config_path() -> Result<PathBuf, ConfigError> {
    paths::config_home()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Load the global config, falling back to defaults when the file is absent
pub fn load_global_config() -> Result<GlobalConfig, ConfigError> {
    match global_config_path() {
        Ok(path) => load_global_config_from(&path),
        Err(_) => Ok(GlobalConfig::default()),
    }
}

pub fn load_global_config_from(path: &Path) -> Result<GlobalConfig, ConfigError> {
    Ok(read_toml(path)?.unwrap_or_default())
}

/// Nearest `.arbor.toml` in `start` or one of its ancestors
pub fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Load the project config for `start`.
///
/// Returns the config together with the directory it was found in, which
/// relative mount sources are resolved against. Without a project file the
/// defaults are returned with `start` as that directory.
pub fn load_project_config(start: &Path) -> Result<(ProjectConfig, PathBuf), ConfigError> {
    let Some(path) = find_project_config(start) else {
        return Ok((ProjectConfig::default(), start.to_path_buf()));
    };
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| start.to_path_buf());
    let config = read_toml(&path)?.unwrap_or_default();
    Ok((config, dir))
}

/// Parse a TOML file; a missing file is `Ok(None)`
fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    debug!(path = %path.display(), "Loaded config file");
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
