//! Configuration
//!
//! - types: global (`config.toml`) and project (`.arbor.toml`) file schemas
//! - load: locating and parsing both files
//! - expand: `${VAR}` expansion, `from_file` values, mount source paths
//! - merge: backend defaults -> global -> project -> flags
//! - request: the resolved creation request handed to a backend

pub mod expand;
pub mod load;
pub mod merge;
pub mod request;
pub mod types;

pub use load::{
    find_project_config, global_config_path, load_global_config, load_project_config,
    PROJECT_CONFIG_FILE,
};
pub use merge::{merge, resolve, FlagOverrides, ResolvedConfig};
pub use request::{BackendConfig, CreateRequest, RepositoryInfo};
pub use types::{BackendSettings, EnvValue, FileMount, GlobalConfig, ProjectConfig, Resources};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("invalid creation request: {0}")]
    InvalidRequest(String),
    #[error("environment variable {name}: failed to read {}: {source}", path.display())]
    EnvFile {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot determine the user's config directory")]
    NoConfigDir,
}
