//! POSIX shell helpers shared by the export artifact writer, Exec and Shell

use std::path::Path;

/// Shell used for non-interactive commands. The export artifact is POSIX, so
/// setup commands and `exec` always run under `sh` regardless of `$SHELL`.
pub const POSIX_SHELL: &str = "/bin/sh";

/// Wrap `value` in single quotes so `sh` reads it back byte-for-byte.
///
/// The only character that needs care inside single quotes is `'` itself,
/// which becomes `'\''` (close, escaped quote, reopen).
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The user's login shell, falling back to `/bin/sh`
pub fn login_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| POSIX_SHELL.to_string())
}

/// Whether `name` can appear on the left of `export NAME=...`
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Build a script that sources `env_file` (when given) and then runs `command`
/// with stderr folded into stdout.
///
/// The command goes on its own line so that trailing comments or operators in
/// it cannot swallow the sourcing step.
pub fn sourced_script(env_file: Option<&Path>, command: &str) -> String {
    let mut script = String::from("exec 2>&1\n");
    if let Some(path) = env_file {
        script.push_str(&format!(
            ". {} || exit 1\n",
            quote(&path.to_string_lossy())
        ));
    }
    script.push_str(command);
    script.push('\n');
    script
}
