//! Value and path expansion applied while merging

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::types::{EnvValue, FileMount};
use super::ConfigError;
use crate::util::paths;

// `${NAME}` or `${NAME:-default}`
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Expand `${VAR}` and `${VAR:-default}` against the process environment.
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    VAR_REGEX
        .replace_all(value, |caps: &Captures| {
            let inner = &caps[1];
            match inner.split_once(":-") {
                Some((name, default)) => lookup(name).unwrap_or_else(|| default.to_string()),
                None => lookup(inner).unwrap_or_default(),
            }
        })
        .into_owned()
}

/// Contents of `path` (after `${VAR}` and `~` expansion) without trailing
/// newlines
fn read_value_file(name: &str, path: &str) -> Result<String, ConfigError> {
    let path = paths::expand_tilde(&expand_env_vars(path));
    let content = fs::read_to_string(&path).map_err(|source| ConfigError::EnvFile {
        name: name.to_string(),
        path: path.clone(),
        source,
    })?;
    Ok(content.trim_end_matches(['\n', '\r']).to_string())
}

/// Resolve every `[env]` entry to its final string value
pub fn expand_env_map(
    env: &BTreeMap<String, EnvValue>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    env.iter()
        .map(|(name, value)| {
            let resolved = match value {
                EnvValue::Literal(literal) => expand_env_vars(literal),
                EnvValue::FromFile { from_file } => read_value_file(name, from_file)?,
            };
            Ok((name.clone(), resolved))
        })
        .collect()
}

/// Expand `~` in mount sources and anchor relative sources at `base_dir`.
/// Targets are left alone; the setup runner anchors them at the workspace.
pub fn expand_file_mounts(files: &[FileMount], base_dir: &Path) -> Vec<FileMount> {
    files
        .iter()
        .map(|mount| {
            let source = paths::expand_tilde(&mount.source.to_string_lossy());
            FileMount {
                source: paths::resolve_relative(base_dir, &source),
                target: mount.target.clone(),
                readonly: mount.readonly,
            }
        })
        .collect()
}

/// Expand `~` in a configured directory
pub fn expand_dir(dir: &str) -> PathBuf {
    paths::expand_tilde(&expand_env_vars(dir))
}
