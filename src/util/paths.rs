//! Path expansion and per-user locations

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory. Paths without one, or when the
/// home directory cannot be determined, are returned unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `$XDG_DATA_HOME`, else `~/.local/share`
pub fn data_home() -> Option<PathBuf> {
    std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
}

/// Directory holding arbor's global config file
pub fn config_home() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("arbor"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/.ssh"), home.join(".ssh"));
        assert_eq!(expand_tilde("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(expand_tilde("~other/x"), PathBuf::from("~other/x"));
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/repo");
        assert_eq!(resolve_relative(base, Path::new("a/b")), PathBuf::from("/repo/a/b"));
        assert_eq!(resolve_relative(base, Path::new("/abs")), PathBuf::from("/abs"));
    }
}
